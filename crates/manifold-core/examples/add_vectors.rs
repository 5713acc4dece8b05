//! Vector addition across execution modes
//!
//! The canonical usage flow: configure a device, allocate device memory,
//! copy host data in, build a kernel, launch it, copy the result back.
//!
//! Select the execution mode with the first argument:
//!
//! ```text
//! cargo run --example add_vectors -- host-parallel
//! ```

use manifold_core::{Device, DeviceConfig, KernelArg, Result};
use manifold_tracing::{init_global_tracing, TracingConfig};

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

fn main() -> Result<()> {
    let _ = init_global_tracing(&TracingConfig::from_env());

    let mode = std::env::args().nth(1).unwrap_or_else(|| "sequential".to_string());
    let mut config = DeviceConfig::new(mode.as_str());
    if mode == "host-parallel" {
        config = config.set("schedule", "compact").set("chunk", 10);
    }

    let entries = 12usize;
    let a_host: Vec<f32> = (0..entries).map(|i| i as f32).collect();
    let b_host: Vec<f32> = (0..entries).map(|i| 1.0 - i as f32).collect();

    let device = Device::with_config(&config)?;

    let a = device.malloc_init::<f32>(&a_host)?;
    let b = device.malloc_init::<f32>(&b_host)?;
    // Untyped allocation: runtime type checking is disabled for this handle.
    let ab = device.malloc_bytes(entries * std::mem::size_of::<f32>())?;

    let add_vectors = device.build_kernel_from_source(ADD_VECTORS, "addVectors")?;
    add_vectors.launch(&[
        KernelArg::from(entries as i32),
        (&a).into(),
        (&b).into(),
        (&ab).into(),
    ])?;

    let mut ab_host = vec![0.0f32; entries];
    ab.copy_to(&mut ab_host)?;

    for (i, value) in ab_host.iter().enumerate() {
        println!("{i}: {value}");
    }
    for i in 0..entries {
        assert_eq!(ab_host[i].to_bits(), (a_host[i] + b_host[i]).to_bits());
    }
    Ok(())
}
