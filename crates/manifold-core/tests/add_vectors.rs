//! End-to-end vector addition across the host execution modes
//!
//! Mirrors the canonical host-side demo: fill two vectors, add them on
//! the device, copy the result back, and compare bitwise (elementwise
//! f32 addition involves no rounding accumulation).

use manifold_core::{Device, DeviceConfig, KernelArg};

const ADD_VECTORS: &str = r#"
    @kernel void addVectors(const int entries,
                            const float *a,
                            const float *b,
                            float *ab) {
      @outer for (int i = 0; i < entries; ++i) {
        ab[i] = a[i] + b[i];
      }
    }
"#;

fn run_add_vectors(config: &DeviceConfig, entries: usize) {
    let device = Device::with_config(config).unwrap();

    let a_host: Vec<f32> = (0..entries).map(|i| i as f32).collect();
    let b_host: Vec<f32> = (0..entries).map(|i| 1.0 - i as f32).collect();

    let a = device.malloc::<f32>(entries).unwrap();
    let b = device.malloc::<f32>(entries).unwrap();
    // Untyped allocation, as the demo does for the output buffer:
    // disables element-type checking for this handle.
    let ab = device.malloc_bytes(entries * std::mem::size_of::<f32>()).unwrap();

    a.copy_from(&a_host).unwrap();
    b.copy_from(&b_host).unwrap();

    let kernel = device.build_kernel_from_source(ADD_VECTORS, "addVectors").unwrap();
    kernel
        .launch(&[
            KernelArg::from(entries as i32),
            (&a).into(),
            (&b).into(),
            (&ab).into(),
        ])
        .unwrap();

    let mut out = vec![0.0f32; entries];
    ab.copy_to(&mut out).unwrap();

    for i in 0..entries {
        assert_eq!(
            out[i].to_bits(),
            (a_host[i] + b_host[i]).to_bits(),
            "mismatch at index {i} for mode {}",
            config.mode_str()
        );
    }
}

#[test]
fn add_vectors_sequential() {
    run_add_vectors(&DeviceConfig::new("sequential"), 12);
}

#[test]
fn add_vectors_host_parallel_default() {
    run_add_vectors(&DeviceConfig::new("host-parallel"), 12);
}

#[test]
fn add_vectors_host_parallel_compact_chunked() {
    // The demo's OpenMP-style configuration
    let config = DeviceConfig::new("host-parallel")
        .set("schedule", "compact")
        .set("chunk", 10);
    run_add_vectors(&config, 12);
}

#[test]
fn add_vectors_host_parallel_all_schedules_large() {
    for schedule in ["static", "dynamic", "compact"] {
        let config = DeviceConfig::new("host-parallel")
            .set("schedule", schedule)
            .set("chunk", 64)
            .set("threads", 4);
        run_add_vectors(&config, 10_000);
    }
}

#[test]
fn add_vectors_stream() {
    run_add_vectors(&DeviceConfig::new("stream"), 12);
}

#[test]
fn add_vectors_built_from_file() {
    let path = std::env::temp_dir().join(format!("manifold-add-vectors-{}.knl", std::process::id()));
    std::fs::write(&path, ADD_VECTORS).unwrap();

    let device = Device::with_config(&DeviceConfig::new("sequential")).unwrap();
    let a = device.malloc_init::<f32>(&[1.0, 2.0, 3.0]).unwrap();
    let b = device.malloc_init::<f32>(&[10.0, 20.0, 30.0]).unwrap();
    let ab = device.malloc::<f32>(3).unwrap();

    let kernel = device.build_kernel(&path, "addVectors").unwrap();
    kernel
        .launch(&[KernelArg::from(3), (&a).into(), (&b).into(), (&ab).into()])
        .unwrap();

    assert_eq!(ab.to_vec::<f32>().unwrap(), vec![11.0, 22.0, 33.0]);
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn missing_kernel_file_is_a_build_error() {
    let device = Device::with_config(&DeviceConfig::new("sequential")).unwrap();
    let err = device
        .build_kernel("/nonexistent/path/kernels.knl", "addVectors")
        .unwrap_err();
    match err {
        manifold_core::Error::Build { diagnostic } => {
            assert!(diagnostic.contains("/nonexistent/path/kernels.knl"), "{diagnostic}");
        }
        other => panic!("expected build error, got {other}"),
    }
}
