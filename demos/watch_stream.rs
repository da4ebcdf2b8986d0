use std::error::Error;

use tracing_subscriber::EnvFilter;
use visionstream_sdk::stream::client::StreamClient;
use visionstream_sdk::stream::config::{source_url_from_query, SessionConfig};
use visionstream_sdk::stream::session::{SessionEvent, StreamSession};

const MAX_FRAMES: u64 = 100;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Same shape the dashboard route receives, e.g. "?url=rtsp%3A%2F%2Fcam%2F1".
    let query = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "?url=REPLACE_WITH_ENCODED_SOURCE_URL".to_string());
    let Some(source_url) = source_url_from_query(&query) else {
        eprintln!("stream URL missing from query {query:?}");
        return Ok(());
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let mut session = StreamSession::with_client(StreamClient::new());
        session.start(SessionConfig::new(source_url))?;

        while let Some(event) = session.recv().await {
            match event {
                SessionEvent::StreamingStarted | SessionEvent::Frame => {
                    let snapshot = session.snapshot();
                    let people = snapshot
                        .cv_metadata()
                        .map(|meta| {
                            format!("{} ({})", meta.person_count, meta.crowd_level().label())
                        })
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "frame={} size={:?}x{:?} fps={:?} people={people}",
                        snapshot.frames_received,
                        snapshot.frame_meta.width,
                        snapshot.frame_meta.height,
                        snapshot.effective_target_fps(),
                    );
                    if snapshot.frames_received >= MAX_FRAMES {
                        session.stop();
                    }
                }
                SessionEvent::StreamStopped { .. } => break,
                other => println!("{other:?} status={:?}", session.status()),
            }
        }

        session.teardown();
        Ok::<(), Box<dyn Error>>(())
    })
}
