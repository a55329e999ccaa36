//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **MessageComposer**: TaskKind ごとの件名・本文
//! - **MailDeliverer**: composer + Mailer の Deliverer
//! - **InMemoryMailer / LogMailer**: 開発用・テスト用の Mailer
//! - **RecordingEventSink**: DispatchEvent の記録
//!
//! SMTP などの本番用トランスポートは `Mailer` を実装して別クレートに置きます。

pub mod composer;
pub mod mail_deliverer;
pub mod memory_mailer;
pub mod recording_sink;

// 主要な型を再エクスポート
pub use self::composer::{ComposedMessage, MessageComposer};
pub use self::mail_deliverer::MailDeliverer;
pub use self::memory_mailer::{InMemoryMailer, LogMailer};
pub use self::recording_sink::RecordingEventSink;
