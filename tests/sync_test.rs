//! End-to-end sessions between a source and an in-process target.

mod common;

use blocksync::{DigestAlgorithm, Error, SourceSync, Verdict};
use common::*;
use std::fs;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tempfile::TempDir;

fn images(tmp: &TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
    (tmp.path().join("source.img"), tmp.path().join("target.img"))
}

fn source_for(src: &std::path::Path, dst: &std::path::Path, block_size: u64) -> SourceSync {
    SourceSync::new(src, dst.to_string_lossy(), block_size)
        .with_retry(fast_retry())
        .with_io_timeout(Some(Duration::from_secs(30)))
}

// =============================================================================
// Segmentation scenarios
// =============================================================================

#[tokio::test]
async fn test_identical_devices_full_blocks() {
    let tmp = TempDir::new().unwrap();
    let (src, dst) = images(&tmp);
    let data = pattern(10_485_760, 1);
    write_image(&src, &data);
    write_image(&dst, &data);

    let connector = InProcessConnector::new(&dst);
    let stats = source_for(&src, &dst, MIB).run(&connector).await.unwrap();
    let target = connector.join_target().await.unwrap();

    assert_eq!(stats.total_blocks, 10);
    assert_eq!(stats.same_blocks, 10);
    assert_eq!(stats.diff_blocks, 0);
    assert_eq!(stats.bytes_sent, 0);
    assert_eq!(stats.bytes_scanned, 10_485_760);
    assert_eq!(target.bytes_written, 0);
}

#[tokio::test]
async fn test_partial_final_block() {
    let tmp = TempDir::new().unwrap();
    let (src, dst) = images(&tmp);
    let data = pattern(10_500_000, 2);
    write_image(&src, &data);
    write_image(&dst, &vec![0u8; 10_500_000]);

    let connector = InProcessConnector::new(&dst);
    let stats = source_for(&src, &dst, MIB).run(&connector).await.unwrap();
    let target = connector.join_target().await.unwrap();

    assert_eq!(stats.total_blocks, 11);
    assert_eq!(stats.diff_blocks, 11);
    assert_eq!(stats.bytes_sent, 10_500_000);
    assert_eq!(target.diff_blocks, 11);
    assert_eq!(target.bytes_written, 10_500_000);
    assert_eq!(fs::read(&dst).unwrap(), data);
}

#[tokio::test]
async fn test_single_changed_block() {
    let tmp = TempDir::new().unwrap();
    let (src, dst) = images(&tmp);
    let data = pattern(10 * MIB as usize, 3);
    let mut stale = data.clone();
    for b in &mut stale[2_097_152..3_145_728] {
        *b = !*b;
    }
    write_image(&src, &data);
    write_image(&dst, &stale);

    let (progress, seen) = verdict_recorder();
    let connector = InProcessConnector::new(&dst);
    let stats = source_for(&src, &dst, MIB)
        .with_progress(progress)
        .run(&connector)
        .await
        .unwrap();
    connector.join_target().await.unwrap();

    assert_eq!(stats.diff_blocks, 1);
    assert_eq!(stats.same_blocks, 9);
    assert_eq!(diff_indices(&seen), vec![2]);
    assert_eq!(seen.lock().unwrap().len(), 10);
    assert_eq!(fs::read(&dst).unwrap(), data);
}

// =============================================================================
// Exactness and idempotence
// =============================================================================

#[tokio::test]
async fn test_only_differing_blocks_written() {
    let tmp = TempDir::new().unwrap();
    let (src, dst) = images(&tmp);
    let block = 4096usize;
    let data = pattern(8 * block + 100, 4);
    let mut stale = data.clone();
    for index in [0usize, 3, 8] {
        stale[index * block] ^= 0xFF;
    }
    write_image(&src, &data);
    write_image(&dst, &stale);

    let (progress, seen) = verdict_recorder();
    let connector = InProcessConnector::new(&dst);
    let stats = source_for(&src, &dst, block as u64)
        .with_progress(progress)
        .run(&connector)
        .await
        .unwrap();
    let target = connector.join_target().await.unwrap();

    assert_eq!(diff_indices(&seen), vec![0, 3, 8]);
    assert_eq!(stats.bytes_sent, (2 * block + 100) as u64);
    assert_eq!(target.diff_blocks, 3);
    assert_eq!(target.same_blocks, 6);
    assert_eq!(fs::read(&dst).unwrap(), data);
}

#[tokio::test]
async fn test_second_run_sends_nothing() {
    let tmp = TempDir::new().unwrap();
    let (src, dst) = images(&tmp);
    write_image(&src, &pattern(300_000, 5));
    write_image(&dst, &pattern(300_000, 6));

    let connector = InProcessConnector::new(&dst);
    let first = source_for(&src, &dst, 65536).run(&connector).await.unwrap();
    connector.join_target().await.unwrap();
    assert!(first.diff_blocks > 0);

    let second = source_for(&src, &dst, 65536).run(&connector).await.unwrap();
    connector.join_target().await.unwrap();
    assert_eq!(second.diff_blocks, 0);
    assert_eq!(second.same_blocks, first.total_blocks);
}

#[tokio::test]
async fn test_sha256_digest_session() {
    let tmp = TempDir::new().unwrap();
    let (src, dst) = images(&tmp);
    let data = pattern(50_000, 7);
    write_image(&src, &data);
    write_image(&dst, &pattern(50_000, 8));

    let connector = InProcessConnector::new(&dst);
    source_for(&src, &dst, 8192)
        .with_digest(DigestAlgorithm::Sha256)
        .run(&connector)
        .await
        .unwrap();
    connector.join_target().await.unwrap();
    assert_eq!(fs::read(&dst).unwrap(), data);
}

#[tokio::test]
async fn test_empty_device() {
    let tmp = TempDir::new().unwrap();
    let (src, dst) = images(&tmp);
    write_image(&src, &[]);
    write_image(&dst, &[]);

    let connector = InProcessConnector::new(&dst);
    let stats = source_for(&src, &dst, 4096).run(&connector).await.unwrap();
    connector.join_target().await.unwrap();
    assert_eq!(stats.total_blocks, 0);
    assert_eq!(stats.blocks_done(), 0);
}

#[tokio::test]
async fn test_larger_target_keeps_tail() {
    let tmp = TempDir::new().unwrap();
    let (src, dst) = images(&tmp);
    let data = pattern(2500, 9);
    write_image(&src, &data);
    write_image(&dst, &vec![0xEEu8; 4096]);

    let connector = InProcessConnector::new(&dst);
    let stats = source_for(&src, &dst, 1024).run(&connector).await.unwrap();
    connector.join_target().await.unwrap();

    assert_eq!(stats.total_blocks, 3);
    let after = fs::read(&dst).unwrap();
    assert_eq!(after.len(), 4096);
    assert_eq!(&after[..2500], &data[..]);
    assert!(after[2500..].iter().all(|&b| b == 0xEE));
}

// =============================================================================
// Negotiation failures
// =============================================================================

#[tokio::test]
async fn test_block_size_mismatch_aborts_before_transfer() {
    let tmp = TempDir::new().unwrap();
    let (src, dst) = images(&tmp);
    let stale = pattern(16384, 11);
    write_image(&src, &pattern(16384, 10));
    write_image(&dst, &stale);

    let (progress, seen) = verdict_recorder();
    let connector = InProcessConnector::new(&dst).with_block_size(8192);
    let err = source_for(&src, &dst, 4096)
        .with_progress(progress)
        .run(&connector)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::BlockSizeMismatch {
            local: 4096,
            remote: 8192
        }
    ));
    assert!(connector.join_target().await.is_err());
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(fs::read(&dst).unwrap(), stale);
}

#[tokio::test]
async fn test_oversized_source_aborts() {
    let tmp = TempDir::new().unwrap();
    let (src, dst) = images(&tmp);
    let stale = pattern(4000, 13);
    write_image(&src, &pattern(5000, 12));
    write_image(&dst, &stale);

    let connector = InProcessConnector::new(&dst);
    let err = source_for(&src, &dst, 1024)
        .run(&connector)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::DeviceTooSmall {
            source_size: 5000,
            target_size: 4000
        }
    ));
    let _ = connector.join_target().await;
    assert_eq!(fs::read(&dst).unwrap(), stale);
}

#[tokio::test]
async fn test_device_path_mismatch() {
    let tmp = TempDir::new().unwrap();
    let (src, dst) = images(&tmp);
    write_image(&src, &pattern(1000, 14));
    write_image(&dst, &pattern(1000, 15));

    let connector = InProcessConnector::new(&dst);
    let err = SourceSync::new(&src, "/dev/elsewhere", 1024)
        .with_retry(fast_retry())
        .run(&connector)
        .await
        .unwrap_err();

    assert!(err.is_mismatch());
    assert!(matches!(err, Error::DevicePathMismatch { .. }));
    let _ = connector.join_target().await;
}

#[tokio::test]
async fn test_missing_remote_device() {
    let tmp = TempDir::new().unwrap();
    let (src, dst) = images(&tmp);
    write_image(&src, &pattern(1000, 16));

    let connector = InProcessConnector::new(&dst);
    let err = source_for(&src, &dst, 1024)
        .run(&connector)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::RemoteDeviceUnavailable { .. }));
    assert!(matches!(
        connector.join_target().await,
        Err(Error::Device { .. })
    ));
}

#[tokio::test]
async fn test_missing_source_device_fails_before_connecting() {
    let tmp = TempDir::new().unwrap();
    let (src, dst) = images(&tmp);
    write_image(&dst, &pattern(1000, 17));

    let connector = InProcessConnector::new(&dst);
    let err = source_for(&src, &dst, 1024)
        .run(&connector)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Device { .. }));
    assert_eq!(connector.calls.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Connection handling
// =============================================================================

#[tokio::test]
async fn test_retries_until_target_answers() {
    let tmp = TempDir::new().unwrap();
    let (src, dst) = images(&tmp);
    let data = pattern(3000, 18);
    write_image(&src, &data);
    write_image(&dst, &[0u8; 3000]);

    let connector = InProcessConnector::new(&dst).failing_first(2);
    let stats = source_for(&src, &dst, 1024).run(&connector).await.unwrap();
    connector.join_target().await.unwrap();

    assert_eq!(connector.calls.load(Ordering::SeqCst), 3);
    assert_eq!(stats.diff_blocks, 3);
    assert_eq!(fs::read(&dst).unwrap(), data);
}

#[tokio::test]
async fn test_gives_up_after_attempts() {
    let tmp = TempDir::new().unwrap();
    let (src, dst) = images(&tmp);
    write_image(&src, &pattern(3000, 19));
    write_image(&dst, &[0u8; 3000]);

    let connector = InProcessConnector::new(&dst).failing_first(5);
    let err = source_for(&src, &dst, 1024)
        .run(&connector)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Connection(_)));
    assert_eq!(connector.calls.load(Ordering::SeqCst), 3);
    assert_eq!(fs::read(&dst).unwrap(), vec![0u8; 3000]);
}

#[tokio::test]
async fn test_stalled_target_times_out() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("source.img");
    write_image(&src, &pattern(2048, 20));

    let connector = ScriptedConnector::new(&["/dev/sdb 1024", "4096"]);
    let err = SourceSync::new(&src, "/dev/sdb", 1024)
        .with_retry(fast_retry())
        .with_io_timeout(Some(Duration::from_millis(50)))
        .run(&connector)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Timeout {
            what: "block digest",
            ..
        }
    ));
}

#[tokio::test]
async fn test_malformed_digest_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("source.img");
    write_image(&src, &pattern(2048, 21));

    let connector = ScriptedConnector::new(&["/dev/sdb 1024", "4096", "zzzz"]);
    let err = SourceSync::new(&src, "/dev/sdb", 1024)
        .with_retry(fast_retry())
        .run(&connector)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Framing(_)));
}

#[tokio::test]
async fn test_progress_reports_every_block_in_order() {
    let tmp = TempDir::new().unwrap();
    let (src, dst) = images(&tmp);
    write_image(&src, &pattern(5 * 1024 + 1, 22));
    write_image(&dst, &pattern(5 * 1024 + 1, 22));

    let (progress, seen) = verdict_recorder();
    let connector = InProcessConnector::new(&dst);
    source_for(&src, &dst, 1024)
        .with_progress(progress)
        .run(&connector)
        .await
        .unwrap();
    connector.join_target().await.unwrap();

    let seen = seen.lock().unwrap();
    let indices: Vec<u64> = seen.iter().map(|(i, _)| *i).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
    assert!(seen.iter().all(|(_, v)| *v == Verdict::Same));
}
