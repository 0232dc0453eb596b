use std::time::Duration;

use shadow_engine_sim::{SimEngineFactory, SimProfile};
use shadow_events::JobId;
use shadow_test_support::fixtures::{magnet_uri, sample_hash};
use shadow_torrent_core::{
    Descriptor, EngineAddRequest, EngineCapabilities, EngineEnvelope, EngineEvent,
    EngineEventSender, EngineFactory, EngineRuntimeConfig, TransferEngine,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

struct Harness {
    engine: std::sync::Arc<dyn TransferEngine>,
    events: mpsc::UnboundedReceiver<EngineEnvelope>,
    _dir: tempfile::TempDir,
    root: std::path::PathBuf,
}

async fn harness(profile: SimProfile, config: EngineRuntimeConfig) -> anyhow::Result<Harness> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().join("downloads");
    let config = EngineRuntimeConfig {
        download_root: root.clone(),
        ..config
    };
    let (tx, events) = mpsc::unbounded_channel();
    let engine = SimEngineFactory::new(profile)
        .construct(&config, EngineEventSender::new(3, tx))
        .await?;
    Ok(Harness {
        engine,
        events,
        _dir: dir,
        root,
    })
}

fn request(seed: u8, harness: &Harness) -> EngineAddRequest {
    EngineAddRequest {
        descriptor: Descriptor::magnet(magnet_uri(&sample_hash(seed), "album")),
        target_path: harness.root.clone(),
        name_hint: None,
    }
}

async fn wait_for(
    events: &mut mpsc::UnboundedReceiver<EngineEnvelope>,
    matches: impl Fn(&EngineEvent) -> bool,
) -> anyhow::Result<EngineEnvelope> {
    let found = timeout(Duration::from_secs(5), async {
        while let Some(envelope) = events.recv().await {
            if matches(&envelope.event) {
                return Some(envelope);
            }
        }
        None
    })
    .await?;
    found.ok_or_else(|| anyhow::anyhow!("event stream closed"))
}

#[tokio::test]
async fn transfer_runs_to_completion_and_writes_files() -> anyhow::Result<()> {
    let mut h = harness(SimProfile::fast(), EngineRuntimeConfig::default()).await?;
    let handle = h.engine.add(request(1, &h)).await?;
    assert_eq!(handle.id, JobId::new(sample_hash(1)));
    assert_eq!(handle.name, "album");

    let added = wait_for(&mut h.events, |event| matches!(event, EngineEvent::Added { .. })).await?;
    assert_eq!(added.generation, 3);
    wait_for(&mut h.events, |event| matches!(event, EngineEvent::Done { .. })).await?;

    let status = h.engine.get(&handle.id).await?.expect("status present");
    assert!(status.done);
    assert!((status.progress - 1.0).abs() < f64::EPSILON);
    assert!(h.root.join("album").join("part-1.bin").exists());
    assert!(h.root.join("album").join("part-2.bin").exists());

    wait_for(&mut h.events, |event| matches!(event, EngineEvent::Upload { .. })).await?;
    Ok(())
}

#[tokio::test]
async fn duplicates_and_unknown_ids_are_errors() -> anyhow::Result<()> {
    let h = harness(SimProfile::fast(), EngineRuntimeConfig::default()).await?;
    h.engine.add(request(2, &h)).await?;
    assert!(h.engine.add(request(2, &h)).await.is_err());
    let missing = JobId::new(sample_hash(9));
    assert!(h.engine.pause(&missing).await.is_err());
    assert!(h.engine.destroy(&missing).await.is_err());
    Ok(())
}

#[tokio::test]
async fn paused_transfers_do_not_advance() -> anyhow::Result<()> {
    let profile = SimProfile {
        materialize_files: false,
        ..SimProfile::fast()
    };
    let h = harness(profile, EngineRuntimeConfig::default()).await?;
    let handle = h.engine.add(request(3, &h)).await?;
    h.engine.pause(&handle.id).await?;
    let before = h.engine.get(&handle.id).await?.expect("status");
    tokio::time::sleep(Duration::from_millis(60)).await;
    let after = h.engine.get(&handle.id).await?.expect("status");
    assert!(after.paused);
    assert_eq!(before.downloaded_bytes, after.downloaded_bytes);

    h.engine.disconnect_peers(&handle.id).await?;
    assert_eq!(h.engine.get(&handle.id).await?.expect("status").peer_count, 0);
    Ok(())
}

#[tokio::test]
async fn minimal_capabilities_refuse_optional_operations() -> anyhow::Result<()> {
    let profile = SimProfile {
        capabilities: EngineCapabilities::minimal(),
        ..SimProfile::fast()
    };
    let h = harness(profile, EngineRuntimeConfig::default()).await?;
    assert_eq!(h.engine.capabilities(), EngineCapabilities::minimal());
    let handle = h.engine.add(request(4, &h)).await?;
    assert!(h.engine.pause(&handle.id).await.is_err());
    assert!(h.engine.disconnect_peers(&handle.id).await.is_err());
    h.engine.destroy(&handle.id).await?;
    assert!(h.engine.list().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn destroy_all_stops_the_worker() -> anyhow::Result<()> {
    let h = harness(SimProfile::fast(), EngineRuntimeConfig::default()).await?;
    h.engine.add(request(5, &h)).await?;
    h.engine.destroy_all().await?;
    assert!(h.engine.list().await.is_err(), "worker should be gone");
    Ok(())
}

#[tokio::test]
async fn existing_content_is_reported_done_on_add() -> anyhow::Result<()> {
    let mut h = harness(SimProfile::fast(), EngineRuntimeConfig::default()).await?;
    let handle = h.engine.add(request(6, &h)).await?;
    wait_for(&mut h.events, |event| matches!(event, EngineEvent::Done { .. })).await?;
    h.engine.destroy(&handle.id).await?;

    h.engine.add(request(6, &h)).await?;
    let status = h.engine.get(&handle.id).await?.expect("status");
    assert!(status.done, "files already on disk");
    Ok(())
}
