//! Integration tests for the disk caches.

use cinegraph_cache::{DiskCacheFolder, FrameHashCache};
use cinegraph_core::{Color, Frame, PixelFormat, RationalTime, TimeRange, VideoParams};
use std::path::PathBuf;
use std::thread;
use tempfile::TempDir;
use uuid::Uuid;

#[test]
fn cache_path_name_is_deterministic_across_threads() {
    let dir = PathBuf::from("/var/cache/cinegraph");
    let id = Uuid::new_v4();
    let here = FrameHashCache::cache_path_name(&dir, id, 1234);

    let there = {
        let dir = dir.clone();
        thread::spawn(move || FrameHashCache::cache_path_name(&dir, id, 1234))
            .join()
            .unwrap()
    };
    assert_eq!(here, there);
    assert_ne!(here, FrameHashCache::cache_path_name(&dir, Uuid::new_v4(), 1234));
    assert_ne!(here, FrameHashCache::cache_path_name(&dir, id, 1235));
}

#[test]
fn times_in_one_frame_share_a_file() {
    let dir = TempDir::new().unwrap();
    let cache = FrameHashCache::new(dir.path(), RationalTime::new(1, 24));
    let a = cache.filename_for_time(RationalTime::new(1, 24));
    let b = cache.filename_for_time(RationalTime::new(1, 24) + RationalTime::new(1, 1000));
    assert_eq!(a, b);
    assert_ne!(a, cache.filename_for_time(RationalTime::new(2, 24)));
}

fn frame(color: Color) -> Frame {
    let mut f = Frame::new(VideoParams::new(6, 4, RationalTime::new(1, 24), PixelFormat::U8, 4));
    f.fill(color);
    f
}

#[test]
fn saved_frame_is_loaded_once_validated() {
    let dir = TempDir::new().unwrap();
    let cache = FrameHashCache::new(dir.path(), RationalTime::new(1, 24));
    let t = RationalTime::new(5, 24);

    cache.save_cache_frame(t, &frame(Color::GREEN)).unwrap();
    assert!(cache.load_cache_frame(t).is_none());

    cache.validate_time(t);
    let loaded = cache.load_cache_frame(t).unwrap();
    assert_eq!(loaded.get_pixel(5, 3), Color::GREEN);

    cache.invalidate(TimeRange::new(RationalTime::ZERO, RationalTime::from_integer(1)));
    assert!(!cache.is_frame_cached(t));
}

#[test]
fn disk_quota_eviction_invalidates_frames() {
    let dir = TempDir::new().unwrap();
    let cache = FrameHashCache::new(dir.path(), RationalTime::new(1, 24));
    let first = RationalTime::ZERO;
    let second = RationalTime::new(1, 24);

    let path = cache.save_cache_frame(first, &frame(Color::RED)).unwrap();
    let size = std::fs::metadata(&path).unwrap().len();
    cache.validate_time(first);

    let disk = DiskCacheFolder::new(dir.path(), size + size / 2);
    assert!(disk.register(&path, size).is_empty());

    let path2 = cache.save_cache_frame(second, &frame(Color::BLUE)).unwrap();
    cache.validate_time(second);
    let evicted = disk.register(&path2, size);
    assert_eq!(evicted, vec![path.clone()]);
    for p in &evicted {
        cache.file_deleted(p);
    }

    assert!(!path.exists());
    assert!(!cache.is_frame_cached(first));
    assert!(cache.is_frame_cached(second));
}
