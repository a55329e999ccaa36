//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部の協力者（時刻、ID、配送トランスポート、イベント記録）への
//! インターフェースを提供し、実装の詳細を隠蔽します。

pub mod clock;
pub mod deliverer;
pub mod event_sink;
pub mod id_generator;
pub mod mailer;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::deliverer::Deliverer;
pub use self::event_sink::{DispatchEvent, EventSink, NoopEventSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::mailer::{Mailer, OutboundMessage};
