//! herald-core
//!
//! In-process deferred dispatch queue for notification tasks.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, context, errors）
//! - **queue**: TaskStatus 状態機械, RetryPolicy, DispatchQueue と in-memory 実装
//! - **ports**: 抽象化レイヤー（Deliverer, Mailer, EventSink, Clock, IdGenerator）
//! - **app**: アプリケーションロジック（builder, dispatcher, processor, worker_loop, status）
//! - **impls**: 実装（MessageComposer, MailDeliverer, 開発用 Mailer, RecordingEventSink）
//! - **config**: DispatchConfig（TOML）
//! - **observability**: 配送カウンタ

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;
