use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tokio::time::{Duration, Instant, sleep};
use tracing_subscriber::EnvFilter;

use herald_core::app::{DispatcherBuilder, StopOutcome, Submission};
use herald_core::config::DispatchConfig;
use herald_core::domain::{DeliveryError, Recipient, RequestContext, Task, TaskKind};
use herald_core::impls::{LogMailer, MailDeliverer, MessageComposer};
use herald_core::ports::{Mailer, OutboundMessage};

/// Run a dispatcher over a logging mailer and push a demo batch through it.
#[derive(Debug, Parser)]
#[command(name = "herald", version)]
struct Args {
    /// TOML config file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of tasks to submit.
    #[arg(short, long, default_value_t = 10)]
    tasks: usize,

    /// Fail every K-th send with a transport error (0 = never).
    #[arg(long, default_value_t = 0)]
    fail_every: u64,

    /// Give up waiting for the queue to drain after this many seconds.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    #[arg(long)]
    json_logs: bool,

    #[arg(long, default_value = "noreply@herald.local")]
    from: String,
}

/// LogMailer に一定間隔で失敗を混ぜる
struct FlakyMailer {
    inner: LogMailer,
    fail_every: u64,
    sends: AtomicU64,
}

#[async_trait]
impl Mailer for FlakyMailer {
    async fn send(&self, message: OutboundMessage) -> Result<(), DeliveryError> {
        let n = self.sends.fetch_add(1, Ordering::Relaxed) + 1;
        if self.fail_every > 0 && n % self.fail_every == 0 {
            return Err(DeliveryError::transport(format!(
                "injected failure on send #{n}"
            )));
        }
        self.inner.send(message).await
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    // 二重初期化は無視
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn demo_task(n: usize) -> Task {
    let address = format!("user{n}@example.org");
    let context = RequestContext::new("demo-tenant").with_actor("herald-cli");
    let kind = TaskKind::ALL[n % TaskKind::ALL.len()];
    let task = match kind {
        TaskKind::StudentCredentials | TaskKind::TeacherCredentials => {
            Task::credentials(kind, Recipient::new(address), format!("user{n}"), format!("tmp-{n:04}"))
        }
        TaskKind::WelcomeMessage => Task::new(kind, Recipient::named(address, format!("User {n}"))),
        TaskKind::PasswordReset => Task::new(kind, Recipient::new(address))
            .with_link(format!("https://herald.local/reset/{n}")),
        TaskKind::Verification => Task::new(kind, Recipient::new(address))
            .with_link(format!("https://herald.local/verify/{n}")),
    };
    task.with_context(context)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    // (A) 設定を読み込む
    let config = match &args.config {
        Some(path) => DispatchConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => DispatchConfig::default(),
    };

    // (B) Deliverer を組み立てて Dispatcher を構築
    let mailer = FlakyMailer {
        inner: LogMailer,
        fail_every: args.fail_every,
        sends: AtomicU64::new(0),
    };
    let composer = MessageComposer::new("Herald").with_login_url("https://herald.local/login");
    let deliverer = Arc::new(MailDeliverer::new(args.from.clone(), composer, mailer));
    let dispatcher = DispatcherBuilder::new(deliverer)
        .config(config)
        .expect_kinds(&TaskKind::ALL)
        .build()
        .context("building dispatcher")?;

    // (C) ワーカーを起動してタスクを投入
    dispatcher.start();
    let mut accepted = 0u64;
    for n in 0..args.tasks {
        match dispatcher.submit(demo_task(n)).await {
            Submission::Rejected(rejected) => {
                tracing::warn!(error = %rejected.error, "submission rejected");
            }
            _ => accepted += 1,
        }
    }

    // (D) 全タスクが Sent / Failed になるまで待つ（Ctrl-C で中断）
    let deadline = Instant::now() + Duration::from_secs(args.timeout_secs);
    loop {
        let counts = dispatcher.counts();
        let settled = counts.sent + counts.failed + counts.delivered_inline + counts.abandoned;
        if settled >= accepted && dispatcher.queue().is_empty() {
            break;
        }
        if Instant::now() >= deadline {
            tracing::warn!(pending = dispatcher.queue().len(), "timed out waiting for the queue to drain");
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("interrupted");
                break;
            }
            _ = sleep(Duration::from_millis(50)) => {}
        }
    }

    // (E) 状態を出力して停止
    let status = dispatcher.status();
    println!("{}", serde_json::to_string_pretty(&status)?);
    if let StopOutcome::Stopped { aborted, abandoned } = dispatcher.stop().await {
        if !abandoned.is_empty() {
            let ids: Vec<String> = abandoned.iter().map(ToString::to_string).collect();
            tracing::warn!(aborted, abandoned = ?ids, "tasks abandoned at shutdown");
        }
    }
    Ok(())
}
