//! Launch-time argument validation

use manifold_core::{Device, DeviceConfig, Error, KernelArg};

const AXPY: &str = r#"
    @kernel void axpy(const int n, const float alpha,
                      const float *x, float *y) {
      @outer for (int i = 0; i < n; ++i) {
        y[i] = alpha * x[i] + y[i];
      }
    }
"#;

fn sequential_device() -> Device {
    Device::with_config(&DeviceConfig::new("sequential")).unwrap()
}

#[test]
fn arity_mismatch_fails_without_executing() {
    let device = sequential_device();
    let x = device.malloc_init::<f32>(&[1.0; 8]).unwrap();
    let y = device.malloc_init::<f32>(&[5.0; 8]).unwrap();
    let kernel = device.build_kernel_from_source(AXPY, "axpy").unwrap();
    assert_eq!(kernel.arity(), 4);

    // Too few arguments
    let err = kernel.launch(&[KernelArg::from(8), (&x).into()]).unwrap_err();
    assert!(
        matches!(err, Error::ArgumentCount { expected: 4, actual: 2 }),
        "{err}"
    );

    // Too many arguments
    let err = kernel
        .launch(&[
            KernelArg::from(8),
            KernelArg::from(2.0f32),
            (&x).into(),
            (&y).into(),
            KernelArg::from(0),
        ])
        .unwrap_err();
    assert!(
        matches!(err, Error::ArgumentCount { expected: 4, actual: 5 }),
        "{err}"
    );

    // Nothing partially executed: y is untouched.
    assert_eq!(y.to_vec::<f32>().unwrap(), vec![5.0; 8]);
}

#[test]
fn cross_device_memory_fails_with_device_mismatch() {
    let device_a = sequential_device();
    let device_b = sequential_device();

    let x_a = device_a.malloc_init::<f32>(&[1.0; 4]).unwrap();
    let y_b = device_b.malloc_init::<f32>(&[1.0; 4]).unwrap();

    let kernel = device_a.build_kernel_from_source(AXPY, "axpy").unwrap();
    let err = kernel
        .launch(&[
            KernelArg::from(4),
            KernelArg::from(1.0f32),
            (&x_a).into(),
            (&y_b).into(),
        ])
        .unwrap_err();
    assert!(matches!(err, Error::DeviceMismatch), "{err}");

    // The same launch with same-device memory succeeds.
    let y_a = device_a.malloc_init::<f32>(&[1.0; 4]).unwrap();
    kernel
        .launch(&[
            KernelArg::from(4),
            KernelArg::from(2.0f32),
            (&x_a).into(),
            (&y_a).into(),
        ])
        .unwrap();
    assert_eq!(y_a.to_vec::<f32>().unwrap(), vec![3.0; 4]);
}

#[test]
fn scalar_kind_mismatch_is_type_error() {
    let device = sequential_device();
    let x = device.malloc_init::<f32>(&[1.0; 4]).unwrap();
    let y = device.malloc_init::<f32>(&[1.0; 4]).unwrap();
    let kernel = device.build_kernel_from_source(AXPY, "axpy").unwrap();

    // double literal into a float parameter: narrowing, rejected
    let err = kernel
        .launch(&[
            KernelArg::from(4),
            KernelArg::from(2.0f64),
            (&x).into(),
            (&y).into(),
        ])
        .unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { .. }), "{err}");

    // buffer where a scalar is expected
    let err = kernel
        .launch(&[KernelArg::from(4), (&x).into(), (&x).into(), (&y).into()])
        .unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { .. }), "{err}");
}

#[test]
fn scalar_widening_is_accepted() {
    let src = r#"
        @kernel void addLong(const int n, const long offset, long *out) {
          @outer for (int i = 0; i < n; ++i) {
            out[i] = offset + i;
          }
        }
    "#;
    let device = sequential_device();
    let out = device.malloc::<i64>(3).unwrap();
    let kernel = device.build_kernel_from_source(src, "addLong").unwrap();

    // i32 argument widens into the long parameter
    kernel.launch(&[KernelArg::from(3), KernelArg::from(100), (&out).into()]).unwrap();
    assert_eq!(out.to_vec::<i64>().unwrap(), vec![100, 101, 102]);
}

#[test]
fn typed_buffer_element_mismatch_is_type_error() {
    let device = sequential_device();
    let wrong = device.malloc_init::<i32>(&[1; 4]).unwrap();
    let y = device.malloc_init::<f32>(&[1.0; 4]).unwrap();
    let kernel = device.build_kernel_from_source(AXPY, "axpy").unwrap();

    let err = kernel
        .launch(&[
            KernelArg::from(4),
            KernelArg::from(1.0f32),
            (&wrong).into(),
            (&y).into(),
        ])
        .unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { .. }), "{err}");
}

#[test]
fn untyped_buffers_launch_unchecked() {
    let device = sequential_device();
    let x = device.malloc_bytes(4 * 4).unwrap();
    x.copy_from(&[1.0f32; 4]).unwrap();
    let y = device.malloc_init::<f32>(&[0.0; 4]).unwrap();

    let kernel = device.build_kernel_from_source(AXPY, "axpy").unwrap();
    kernel
        .launch(&[
            KernelArg::from(4),
            KernelArg::from(3.0f32),
            (&x).into(),
            (&y).into(),
        ])
        .unwrap();
    assert_eq!(y.to_vec::<f32>().unwrap(), vec![3.0; 4]);
}

#[test]
fn freed_buffer_in_launch_is_use_after_free() {
    let device = sequential_device();
    let x = device.malloc_init::<f32>(&[1.0; 4]).unwrap();
    let y = device.malloc_init::<f32>(&[1.0; 4]).unwrap();
    let kernel = device.build_kernel_from_source(AXPY, "axpy").unwrap();

    x.free().unwrap();
    let err = kernel
        .launch(&[
            KernelArg::from(4),
            KernelArg::from(1.0f32),
            (&x).into(),
            (&y).into(),
        ])
        .unwrap_err();
    assert!(matches!(err, Error::UseAfterFree), "{err}");
}

#[test]
fn out_of_bounds_kernel_access_is_backend_execution_error() {
    let src = r#"
        @kernel void overrun(const int n, float *x) {
          @outer for (int i = 0; i < n; ++i) {
            x[i + 1] = 1.0;
          }
        }
    "#;
    let device = sequential_device();
    let x = device.malloc::<f32>(4).unwrap();
    let kernel = device.build_kernel_from_source(src, "overrun").unwrap();

    let err = kernel.launch(&[KernelArg::from(4), (&x).into()]).unwrap_err();
    assert!(matches!(err, Error::BackendExecution(_)), "{err}");
}
