// Shared memory backend and segment manager tests
// Run with: cargo test --test shared_memory -- --nocapture

#[cfg(target_os = "linux")]
mod linux_tests {
    use dmxp_dataflow::Core::{
        attach_shared_memory, create_shared_memory, open_or_create_shared_memory,
        unlink_shared_memory, RawHandle,
    };
    use dmxp_dataflow::{MessagingError, SharedMemManager};
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_create_and_attach_share_bytes() {
        let name = "dmxp_test_create_attach";
        let shm = create_shared_memory(4096, name).unwrap();
        assert_eq!(shm.size(), 4096);
        assert_eq!(shm.name(), name);
        let RawHandle::Fd(fd) = shm.raw_handle();
        assert!(fd > 0);

        let peer = attach_shared_memory(name, 4096).unwrap();
        unsafe {
            *shm.as_ptr() = 0x42;
            *shm.as_ptr().add(4095) = 0x24;
            assert_eq!(*peer.as_ptr(), 0x42);
            assert_eq!(*peer.as_ptr().add(4095), 0x24);
        }
        unlink_shared_memory(name).unwrap();
    }

    #[test]
    #[serial]
    fn test_fresh_region_is_zeroed() {
        let name = "dmxp_test_zero";
        let shm = create_shared_memory(1024, name).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(shm.as_ptr(), 1024) };
        assert!(bytes.iter().all(|&b| b == 0));
        unlink_shared_memory(name).unwrap();
    }

    #[test]
    #[serial]
    fn test_attach_missing_fails() {
        let err = attach_shared_memory("dmxp_test_missing", 4096).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    #[serial]
    fn test_open_or_create_reports_creator() {
        let name = "dmxp_test_open_or_create";
        let _ = unlink_shared_memory(name);
        let (_first, created) = open_or_create_shared_memory(name, 4096).unwrap();
        let (_second, created_again) = open_or_create_shared_memory(name, 4096).unwrap();
        assert!(created);
        assert!(!created_again);
        unlink_shared_memory(name).unwrap();
        // unlinking twice is fine
        unlink_shared_memory(name).unwrap();
    }

    #[test]
    #[serial]
    fn test_manager_tracks_segments() {
        let mut shmm = SharedMemManager::with_prefix("dmxp_test_mgr");
        let a = shmm.alloc_shared_memory(4096).unwrap();
        let b = shmm.alloc_shared_memory(8192).unwrap();
        assert_ne!(a.name(), b.name());
        assert!(a.name().starts_with("dmxp_test_mgr_"));
        assert_eq!(shmm.segment_count(), 2);
        assert_eq!(shmm.total_bytes(), 4096 + 8192);
        assert!(a.same_segment(&a.clone()));
        assert!(!a.same_segment(&b));

        assert_eq!(shmm.stop(), 2);
        assert!(shmm.is_stopped());
        assert_eq!(shmm.segment_count(), 0);
        assert!(!std::path::Path::new(&format!("/dev/shm/{}", a.name())).exists());
    }

    #[test]
    #[serial]
    fn test_zero_size_rejected() {
        let mut shmm = SharedMemManager::with_prefix("dmxp_test_zero_size");
        let err = shmm.alloc_shared_memory(0).unwrap_err();
        assert!(matches!(err, MessagingError::Allocation { .. }));
    }

    #[test]
    #[serial]
    fn test_use_after_release() {
        let mut shmm = SharedMemManager::with_prefix("dmxp_test_release");
        let segment = shmm.alloc_shared_memory(4096).unwrap();
        segment.with(|base, len| unsafe { *base.add(len - 1) = 7 }).unwrap();

        shmm.stop();
        assert!(segment.is_released());
        let err = segment.with(|_, _| ()).unwrap_err();
        assert!(matches!(err, MessagingError::UseAfterRelease { .. }));
    }

    #[test]
    #[serial]
    fn test_stop_is_idempotent_and_restartable() {
        let mut shmm = SharedMemManager::with_prefix("dmxp_test_restart");
        shmm.alloc_shared_memory(4096).unwrap();
        assert_eq!(shmm.stop(), 1);
        assert_eq!(shmm.stop(), 0);

        // allocating again brings the manager back up
        let segment = shmm.alloc_shared_memory(4096).unwrap();
        assert!(!shmm.is_stopped());
        assert!(!segment.is_released());
        assert_eq!(shmm.stop(), 1);
    }
}

#[cfg(not(target_os = "linux"))]
mod non_linux_tests {
    use dmxp_dataflow::Core::{attach_shared_memory, create_shared_memory};

    #[test]
    fn test_unsupported_platform() {
        let err = create_shared_memory(4096, "dmxp_test").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::Unsupported);
        let err = attach_shared_memory("dmxp_test", 4096).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::Unsupported);
    }
}
