//! Load sequencing against in-process protection and image doubles

use std::sync::Arc;

use copro_abi::{BinaryKind, Host, HostConfig, TableVariant};
use copro_arena::{AllocPolicy, Arena, KernelAddr};
use copro_fw_mock::{image_bytes, MockAuxFirmware, MockImageProvider, MockVerifier, RecordingProtection};
use copro_loader::*;
use copro_sched::{SchedulerConfig, TaskScheduler};

fn host() -> Arc<Host> {
    let _ = env_logger::builder().is_test(true).try_init();
    let arena = Arc::new(Arena::new(AllocPolicy::Bump));
    let mut config = SchedulerConfig::default();
    config.affinity = false;
    let scheduler = Arc::new(TaskScheduler::new(config).unwrap());
    Arc::new(Host::new(HostConfig::default(), arena, scheduler).unwrap())
}

fn small_config(name: &str) -> ImageConfig {
    ImageConfig {
        name: name.into(),
        base: 0x2000_0000,
        capacity: 0x4000,
        code: vec![CodeRegion { offset: 0, size: 0x2000 }],
        entry_offset: 0x100,
        data_offset: 0x2000,
        data_segments: vec![DataSegment { offset: 0x2000, len: None }],
    }
}

/// Protection calls as (region base, set, clear)
fn calls(protection: &RecordingProtection) -> Vec<(KernelAddr, Protection, Protection)> {
    protection
        .changes()
        .into_iter()
        .map(|(region, set, clear)| (region.base, set, clear))
        .collect()
}

struct Fixture {
    images: Arc<MockImageProvider>,
    protection: Arc<RecordingProtection>,
    firmware: Arc<MockAuxFirmware>,
    loader: Loader,
    image: FirmwareImage,
}

fn fixture() -> Fixture {
    let images = Arc::new(MockImageProvider::new());
    let protection = Arc::new(RecordingProtection::new());
    let firmware = Arc::new(MockAuxFirmware::new());
    let loader = Loader::new(host(), images.clone()).with_protection(protection.clone());
    let image = FirmwareImage::new(
        ImageKind::Auxiliary,
        small_config("rta.bin"),
        Some(firmware.clone() as Arc<dyn FirmwareEntry>),
    )
    .unwrap();

    Fixture {
        images,
        protection,
        firmware,
        loader,
        image,
    }
}

/// Loader handing executable enforcement to `verifier`
fn verified(verifier: Arc<MockVerifier>) -> (Arc<MockImageProvider>, Arc<RecordingProtection>, Loader, FirmwareImage) {
    let images = Arc::new(MockImageProvider::new());
    let protection = Arc::new(RecordingProtection::new());
    let loader = Loader::new(host(), images.clone())
        .with_protection(protection.clone())
        .with_verifier(verifier);
    let image = FirmwareImage::new(ImageKind::Auxiliary, small_config("rta.bin"), None).unwrap();

    (images, protection, loader, image)
}

/// Full load: NX before W, then -W before X, copy, version, entry call
#[test]
fn test_full_load_sequence() {
    let f = fixture();
    f.images.put("rta.bin", image_bytes(0x3000, 0xAA, "[RTA]v1.4"));

    f.loader.load(&f.image, LoadKind::All).unwrap();

    assert_eq!(f.image.state(), LoadState::Running);
    assert_eq!(f.image.protection(), ProtectionState::Executable);
    assert!(f.image.window().is_wx_clean());
    assert_eq!(f.image.window().protection(0), Some(Protection::RX));

    assert_eq!(
        calls(&f.protection),
        vec![
            (0x2000_0000, Protection::empty(), Protection::EXEC),
            (0x2000_0000, Protection::WRITE, Protection::empty()),
            (0x2000_0000, Protection::empty(), Protection::WRITE),
            (0x2000_0000, Protection::EXEC, Protection::empty()),
        ]
    );
    assert!(f.protection.never_wx());

    assert_eq!(f.image.window().read(0, 4).unwrap(), vec![0xAA; 4]);
    assert_eq!(
        f.loader.host().binary_version(BinaryKind::Auxiliary).as_deref(),
        Some("[RTA]v1.4")
    );
    assert_eq!(f.firmware.entries(), vec![0x2000_0100]);
    assert_eq!(f.firmware.table().map(|t| t.variant()), Some(TableVariant::Auxiliary));
}

/// A second full load of a running image is a successful no-op
#[test]
fn test_reload_is_idempotent() {
    let f = fixture();
    f.images.put("rta.bin", image_bytes(0x3000, 1, "v1"));

    f.loader.load(&f.image, LoadKind::All).unwrap();
    f.loader.load(&f.image, LoadKind::All).unwrap();

    assert_eq!(f.firmware.starts(), 1);
    assert_eq!(f.protection.changes().len(), 4);
    assert_eq!(f.images.requests().len(), 1);
    assert_eq!(f.image.starts(), 1);
}

/// Oversized images fail validation before any protection change
#[test]
fn test_too_large_never_toggles() {
    let f = fixture();
    f.images.put("rta.bin", vec![0; 0x4001]);

    let err = f.loader.load(&f.image, LoadKind::All).unwrap_err();

    assert!(matches!(
        err,
        LoaderError::ImageTooLarge { size: 0x4001, capacity: 0x4000, .. }
    ));
    assert_eq!(f.image.state(), LoadState::Failed);
    assert!(f.protection.changes().is_empty());
    assert_eq!(f.firmware.starts(), 0);
}

/// Failing to add write restores execute and reports the error
#[test]
fn test_write_failure_rolls_back() {
    let f = fixture();
    f.images.put("rta.bin", image_bytes(0x3000, 1, "v1"));
    f.protection.fail_at(1);

    let err = f.loader.load(&f.image, LoadKind::All).unwrap_err();

    assert!(matches!(err, LoaderError::Protection { step: "add write", .. }));
    assert_eq!(f.image.state(), LoadState::Failed);
    assert_eq!(f.image.protection(), ProtectionState::Executable);
    assert_eq!(f.image.window().protection(0), Some(Protection::RX));
    assert_eq!(
        calls(&f.protection).last(),
        Some(&(0x2000_0000, Protection::EXEC, Protection::empty()))
    );

    // Nothing was copied
    assert_eq!(f.image.window().read(0, 4).unwrap(), vec![0; 4]);
}

/// Failing to restore execute leaves the code writable; a retry picks up from there
#[test]
fn test_retry_after_execute_failure() {
    let f = fixture();
    f.images.put("rta.bin", image_bytes(0x3000, 1, "v1"));
    f.protection.fail_at(3);

    let err = f.loader.load(&f.image, LoadKind::All).unwrap_err();
    assert!(matches!(err, LoaderError::Protection { step: "add execute", .. }));
    assert_eq!(f.image.protection(), ProtectionState::Writable);

    f.protection.clear_failure();
    f.images.put("rta.bin", image_bytes(0x3000, 2, "v2"));
    f.loader.load(&f.image, LoadKind::All).unwrap();

    assert_eq!(f.image.state(), LoadState::Running);
    assert_eq!(f.image.protection(), ProtectionState::Executable);
    assert_eq!(f.image.window().read(0, 1).unwrap(), vec![2]);
    assert_eq!(f.firmware.starts(), 1);
}

/// Data-only reload refreshes data, keeps code and protection untouched
#[test]
fn test_data_only_reload() {
    let f = fixture();
    f.images.put("rta.bin", image_bytes(0x3000, 1, "v1"));
    f.loader.load(&f.image, LoadKind::All).unwrap();

    f.images.put("rta.bin", image_bytes(0x3000, 2, "v2"));
    f.loader.load(&f.image, LoadKind::DataOnly).unwrap();

    assert_eq!(f.image.window().read(0, 1).unwrap(), vec![1]);
    assert_eq!(f.image.window().read(0x2000, 1).unwrap(), vec![2]);
    assert_eq!(f.protection.changes().len(), 4);
    assert_eq!(f.firmware.starts(), 2);
    assert_eq!(
        f.loader.host().binary_version(BinaryKind::Auxiliary).as_deref(),
        Some("v2")
    );
}

/// Data-only rules: code must be present, image must reach the data area
#[test]
fn test_data_only_preconditions() {
    let f = fixture();
    f.images.put("rta.bin", image_bytes(0x3000, 1, "v1"));

    assert!(matches!(
        f.loader.load(&f.image, LoadKind::DataOnly),
        Err(LoaderError::InvalidState { .. })
    ));

    f.loader.load(&f.image, LoadKind::All).unwrap();
    f.images.put("rta.bin", vec![3; 0x2000]);

    assert!(matches!(
        f.loader.load(&f.image, LoadKind::DataOnly),
        Err(LoaderError::ImageCorrupt { .. })
    ));
    assert_eq!(f.image.state(), LoadState::Failed);
    assert!(f.image.code_loaded());

    // Still recoverable with a good data image
    f.images.put("rta.bin", image_bytes(0x3000, 4, "v3"));
    f.loader.load(&f.image, LoadKind::DataOnly).unwrap();
    assert_eq!(f.image.state(), LoadState::Running);
}

/// With a verifier, executable enforcement is delegated after the copy
#[test]
fn test_verifier_path() {
    let verifier = Arc::new(MockVerifier::new());
    let (images, protection, loader, image) = verified(verifier.clone());

    images.put("rta.bin", image_bytes(0x3000, 1, "v1"));
    loader.load(&image, LoadKind::All).unwrap();

    // Only the NX/RW half ran locally
    assert_eq!(protection.changes().len(), 2);
    assert!(image.window().is_wx_clean());

    let installed = verifier.installed();
    assert_eq!(installed.len(), 1);
    assert_eq!(installed[0].binary_base, 0x2000_0000);
    assert_eq!(installed[0].binary_size, 0x3000);
    assert_eq!(installed[0].code, image.window().regions().to_vec());
    assert_eq!(image.registration(), Some(installed[0].clone()));
    assert!(verifier.revoked().is_empty());
}

/// A refused verification fails the load; the caller may retry once it clears
#[test]
fn test_verifier_refusal_fails() {
    let verifier = Arc::new(MockVerifier::new());
    verifier.refuse(true);
    let (images, protection, loader, image) = verified(verifier.clone());

    images.put("rta.bin", image_bytes(0x3000, 1, "v1"));
    let err = loader.load(&image, LoadKind::All).unwrap_err();

    assert!(matches!(err, LoaderError::Verifier { .. }));
    assert_eq!(image.state(), LoadState::Failed);
    assert!(!image.code_loaded());
    assert_eq!(image.registration(), None);

    verifier.refuse(false);
    loader.load(&image, LoadKind::All).unwrap();

    assert_eq!(image.state(), LoadState::Running);
    assert!(image.code_loaded());
    assert_eq!(verifier.installed().len(), 1);
    // The refused registration was never installed, so nothing is revoked
    assert!(verifier.revoked().is_empty());
    // The code stayed writable across the retry; no second NX/RW toggle
    assert_eq!(protection.changes().len(), 2);
}

/// Fatal latch blocks loading
#[test]
fn test_fatal_latch_blocks_loads() {
    let f = fixture();
    f.images.put("rta.bin", image_bytes(0x3000, 1, "v1"));
    f.loader.host().assert_fatal();

    assert!(matches!(f.loader.load(&f.image, LoadKind::All), Err(LoaderError::Fatal)));
    assert_eq!(f.image.state(), LoadState::Unloaded);
    assert!(f.images.requests().is_empty());
}

/// Renamed images are requested by their new name
#[test]
fn test_set_name() {
    let f = fixture();
    f.images.put_user("rta_v2.bin", image_bytes(0x3000, 1, "v1"));

    assert!(matches!(
        f.loader.load(&f.image, LoadKind::All),
        Err(LoaderError::ImageUnavailable { .. })
    ));

    f.image.set_name("rta_v2.bin");
    f.loader.load(&f.image, LoadKind::All).unwrap();
    assert_eq!(f.image.source(), Some(ImageSource::UserProvided));
    assert_eq!(f.images.requests(), vec!["rta.bin".to_string(), "rta_v2.bin".to_string()]);
}
