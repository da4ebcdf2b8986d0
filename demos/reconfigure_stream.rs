use std::error::Error;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use visionstream_sdk::stream::client::{StreamClient, StreamClientOptions};
use visionstream_sdk::stream::config::SessionConfig;
use visionstream_sdk::stream::session::{SessionEvent, StreamSession};

const FRAMES_PER_SETTING: u64 = 50;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let source_url = "REPLACE_WITH_SOURCE_URL".to_string();
    let backend_host = "localhost";

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = StreamClient::new()
            .with_host(backend_host)
            .with_options(StreamClientOptions {
                connect_timeout: Some(Duration::from_secs(5)),
            });
        let mut session = StreamSession::with_client(client);
        let mut observer = session.subscribe();

        let renderer = tokio::spawn(async move {
            while observer.changed().await.is_ok() {
                let snapshot = observer.borrow_and_update().clone();
                println!(
                    "[{:?}] {} strength={} frame_bytes={}",
                    snapshot.state,
                    snapshot.status,
                    snapshot.connection_strength,
                    snapshot.frame.as_base64().map(str::len).unwrap_or(0),
                );
            }
        });

        let low = SessionConfig::new(source_url.clone())
            .with_target_fps(10)
            .with_jpeg_quality(30);
        let high = SessionConfig::new(source_url)
            .with_target_fps(30)
            .with_jpeg_quality(90)
            .with_output_resize_factor(1.0);

        session.start(low)?;
        let mut switched = false;
        while let Some(event) = session.recv().await {
            match event {
                SessionEvent::Frame => {
                    if session.snapshot().frames_received < FRAMES_PER_SETTING {
                        continue;
                    }
                    if switched {
                        break;
                    }
                    switched = true;
                    session.reconfigure(high.clone())?;
                }
                SessionEvent::Failed { .. } | SessionEvent::Disconnected => break,
                _ => {}
            }
        }

        session.teardown();
        drop(session);
        let _ = renderer.await;
        Ok::<(), Box<dyn Error>>(())
    })
}
