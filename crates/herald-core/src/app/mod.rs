//! App - アプリケーション層
//!
//! ports と queue を組み合わせて配送処理を実装します。
//!
//! # 主要コンポーネント
//! - **DispatcherBuilder**: 構築とワイヤリング（起動時検証つき）
//! - **Dispatcher**: 投入口と start / stop / clear / status
//! - **Processor**: ワーカー群のライフサイクル
//! - **WorkerLoop**: dequeue -> deliver -> retry 判定ループ
//! - **ProcessorStatus**: 状態スナップショット

pub mod builder;
pub mod dispatcher;
pub mod processor;
pub mod status;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, DispatcherBuilder};
pub use self::dispatcher::{DispatchMode, Dispatcher, Submission};
pub use self::processor::{Processor, RunState, StartOutcome, StopOutcome};
pub use self::status::ProcessorStatus;
pub use self::worker_loop::{TaskOutcome, WorkerContext, WorkerLoop};
