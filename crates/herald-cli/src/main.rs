use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use serde_json::{Value, json};
use tokio::time::{Duration, timeout};
use tracing::{info, warn};

use herald_core::QueueEngine;
use herald_core::config::{ConfigError, ConfigLoader, QueueConfig, QueuesConfig};
use herald_core::domain::envelope::{CreateRequest, Payload};
use herald_core::impls::{ChannelEventSink, InMemoryTransport, LoggingEventSink};
use herald_core::observability::init_logging;
use herald_core::ports::{Capability, CapabilityError, CapabilityResult, EventSink, Method};

/// Herald demo: publishes sample messages through the in-memory transport
#[derive(Debug, Parser)]
#[command(name = "herald", version)]
struct Args {
    /// Queue configuration file (TOML)
    #[arg(long, env = "HERALD_CONFIG")]
    config: Option<PathBuf>,

    /// How many times `sendWelcomeEmail` fails before succeeding
    #[arg(long, default_value_t = 2)]
    failures: u32,

    /// Number of users to create
    #[arg(long, default_value_t = 3)]
    users: u32,

    /// Give up waiting after this many seconds
    #[arg(long, default_value_t = 30)]
    wait_secs: u64,
}

/// users サービス：create は即成功、sendWelcomeEmail は指定回数だけ失敗する
struct Users {
    welcome: Arc<SendWelcomeEmail>,
}

#[async_trait]
impl Capability for Users {
    async fn create(&self, data: Value, _params: Option<Value>) -> CapabilityResult {
        Ok(json!({"created": data}))
    }

    fn method(&self, name: &str) -> Option<Arc<dyn Method>> {
        match name {
            "sendWelcomeEmail" => Some(self.welcome.clone()),
            _ => None,
        }
    }
}

struct SendWelcomeEmail {
    remaining_failures: AtomicU32,
}

#[async_trait]
impl Method for SendWelcomeEmail {
    async fn call(&self, args: Vec<Value>) -> CapabilityResult {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(CapabilityError::new(format!("intentional failure (left={left})"))
                .with_code("SMTP_UNAVAILABLE"));
        }
        Ok(json!({"sent": args.first().cloned().unwrap_or(Value::Null)}))
    }
}

/// 設定ファイルが見つからなければ手元で動く最小構成
fn demo_config() -> QueuesConfig {
    let mut queue = QueueConfig::bound("default-topic", "default-subscription").with_dead_letter("default-dlq");
    queue.retry_delay = 200;
    queue.max_retry_delay = 2_000;
    QueuesConfig::default().with_queue("default", queue)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging("herald").context("failed to initialise logging")?;

    let loader = match &args.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let config = match loader.load() {
        Ok(config) => config,
        Err(ConfigError::NotFound) => {
            warn!("no configuration file found, using the built-in demo queue");
            demo_config()
        }
        Err(e) => return Err(e).context("failed to load queue configuration"),
    };

    // (A) Transport / Capability / Engine を用意
    let transport = InMemoryTransport::with_auto_delivery();
    let (events, mut rx) = ChannelEventSink::new();
    let users = Users {
        welcome: Arc::new(SendWelcomeEmail {
            remaining_failures: AtomicU32::new(args.failures),
        }),
    };
    let engine = QueueEngine::builder(config, Arc::new(transport))
        .register("users", Arc::new(users))?
        .expect_services(&["users"])
        .with_event_sink(Arc::new(events))
        .build()?;

    // (B) 全キューを結線して listener を登録
    engine.setup().await?;

    // (C) メッセージ投入（create と named method を 1 件ずつ）
    let mut expected = 0;
    for n in 1..=args.users {
        let user_id = format!("user-{n}");
        let created = engine
            .create(CreateRequest::new(Payload::action(
                "users",
                "create",
                json!({"userId": user_id}),
            )))
            .await?;
        let welcome = engine
            .create(
                CreateRequest::new(Payload::method(
                    "users",
                    "sendWelcomeEmail",
                    vec![json!(user_id)],
                ))
                .with_priority(1),
            )
            .await?;
        info!(create = %created.message_id(), welcome = %welcome.message_id(), "published");
        expected += 2;
    }

    // (D) 全件が completed / error になるまで待つ
    let wait = async {
        let mut settled = 0;
        while settled < expected {
            let Some(event) = rx.recv().await else { break };
            settled += 1;
            LoggingEventSink.emit(event);
        }
        settled
    };

    tokio::select! {
        settled = timeout(Duration::from_secs(args.wait_secs), wait) => match settled {
            Ok(n) => info!(settled = n, expected, "all messages settled"),
            Err(_) => warn!(expected, "timed out waiting for messages"),
        },
        _ = tokio::signal::ctrl_c() => warn!("interrupted"),
    }

    // (E) 集計を表示
    println!("{}", serde_json::to_string_pretty(&engine.stats())?);
    Ok(())
}
