//! Memory allocation, transfer, and lifetime properties

use manifold_core::{Device, DeviceConfig, Error};

fn modes() -> Vec<DeviceConfig> {
    vec![
        DeviceConfig::new("sequential"),
        DeviceConfig::new("host-parallel").set("threads", 2),
        DeviceConfig::new("stream"),
    ]
}

#[test]
fn copy_roundtrip_is_byte_identical_on_every_mode() {
    for config in modes() {
        let device = Device::with_config(&config).unwrap();
        let memory = device.malloc_bytes(256).unwrap();

        let pattern: Vec<u8> = (0..=255).collect();
        memory.copy_from_bytes(&pattern).unwrap();

        let mut out = vec![0u8; 256];
        memory.copy_to_bytes(&mut out).unwrap();
        assert_eq!(out, pattern, "mode {}", config.mode_str());
    }
}

#[test]
fn shorter_host_buffers_transfer_partially() {
    let device = Device::with_config(&DeviceConfig::new("sequential")).unwrap();
    let memory = device.malloc_init::<i32>(&[1, 2, 3, 4]).unwrap();

    let mut head = [0i32; 2];
    memory.copy_to(&mut head).unwrap();
    assert_eq!(head, [1, 2]);

    memory.copy_from(&[9]).unwrap();
    assert_eq!(memory.to_vec::<i32>().unwrap(), vec![9, 2, 3, 4]);
}

#[test]
fn oversized_transfers_fail_with_size_mismatch() {
    let device = Device::with_config(&DeviceConfig::new("sequential")).unwrap();
    let memory = device.malloc::<f32>(4).unwrap();

    let err = memory.copy_from(&[0.0f32; 5]).unwrap_err();
    assert!(
        matches!(err, Error::SizeMismatch { requested: 20, capacity: 16 }),
        "{err}"
    );

    let mut too_big = [0.0f32; 6];
    let err = memory.copy_to(&mut too_big).unwrap_err();
    assert!(matches!(err, Error::SizeMismatch { .. }), "{err}");
}

#[test]
fn typed_handles_check_element_identity() {
    let device = Device::with_config(&DeviceConfig::new("sequential")).unwrap();
    let memory = device.malloc::<f32>(4).unwrap();
    assert_eq!(memory.len(), Some(4));

    let err = memory.copy_from(&[0i32; 4]).unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { .. }), "{err}");

    let mut ints = [0i64; 2];
    let err = memory.copy_to(&mut ints).unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { .. }), "{err}");
}

#[test]
fn untyped_handles_skip_element_checking() {
    let device = Device::with_config(&DeviceConfig::new("sequential")).unwrap();
    let memory = device.malloc_bytes(16).unwrap();
    assert_eq!(memory.element_type(), None);
    assert_eq!(memory.len(), None);

    // Any element type moves through an untyped handle.
    memory.copy_from(&[1i32, 2, 3, 4]).unwrap();
    let mut floats = [0.0f32; 4];
    memory.copy_to(&mut floats).unwrap();

    let mut ints = [0i32; 4];
    memory.copy_to(&mut ints).unwrap();
    assert_eq!(ints, [1, 2, 3, 4]);
}

#[test]
fn use_after_free_is_reported() {
    let device = Device::with_config(&DeviceConfig::new("sequential")).unwrap();
    let memory = device.malloc_init::<f32>(&[1.0, 2.0]).unwrap();
    assert!(memory.is_live());

    memory.free().unwrap();
    assert!(!memory.is_live());

    assert!(matches!(memory.copy_from(&[0.0f32; 2]), Err(Error::UseAfterFree)));
    let mut out = [0.0f32; 2];
    assert!(matches!(memory.copy_to(&mut out), Err(Error::UseAfterFree)));
    assert!(matches!(memory.free(), Err(Error::UseAfterFree)));
}

#[test]
fn allocation_failure_is_out_of_memory() {
    let device = Device::with_config(&DeviceConfig::new("sequential")).unwrap();
    let err = device.malloc_bytes(usize::MAX / 2).unwrap_err();
    assert!(matches!(err, Error::OutOfMemory { .. }), "{err}");
}

#[test]
fn zero_length_allocations_are_valid() {
    let device = Device::with_config(&DeviceConfig::new("sequential")).unwrap();
    let memory = device.malloc::<f32>(0).unwrap();
    assert_eq!(memory.len_bytes(), 0);
    memory.copy_from(&[] as &[f32]).unwrap();
    assert_eq!(memory.to_vec::<f32>().unwrap(), Vec::<f32>::new());
}

#[test]
fn stream_copies_observe_prior_launches() {
    // copy_to after a launch must see the kernel's output even though
    // the stream driver executes asynchronously behind a queue.
    let device = Device::with_config(&DeviceConfig::new("stream")).unwrap();
    let src = r#"
        @kernel void iota(const int n, int *out) {
          @outer for (int i = 0; i < n; ++i) { out[i] = i; }
        }
    "#;
    let out = device.malloc::<i32>(64).unwrap();
    let kernel = device.build_kernel_from_source(src, "iota").unwrap();
    kernel
        .launch(&[manifold_core::KernelArg::from(64), (&out).into()])
        .unwrap();

    let expected: Vec<i32> = (0..64).collect();
    assert_eq!(out.to_vec::<i32>().unwrap(), expected);
}
