//! Integration tests for retry and circuit breaking.

use dictation_guard::infrastructure::mocks::MockClock;
use dictation_guard::{
    CircuitState, ClassifyFailure, FailureKind, Kernel, KernelConfig, RecoveryError,
};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
enum EngineError {
    Busy,
    ModelMissing,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Busy => f.write_str("engine busy"),
            EngineError::ModelMissing => f.write_str("model file missing"),
        }
    }
}

impl std::error::Error for EngineError {}

impl ClassifyFailure for EngineError {
    fn classify(&self) -> FailureKind {
        match self {
            EngineError::Busy => FailureKind::Transient,
            EngineError::ModelMissing => FailureKind::Terminal,
        }
    }
}

/// Kernel with zero backoff so blocking tests do not sleep.
fn kernel(max_retries: u32, failure_threshold: u32) -> (Kernel, MockClock) {
    let clock = MockClock::new(Instant::now());
    let mut config = KernelConfig::default();
    config.recovery.max_retries = max_retries;
    config.recovery.base_delay_ms = 0;
    config.recovery.io_delay_step_ms = 0;
    config.recovery.failure_threshold = failure_threshold;
    config.recovery.break_duration_secs = 30;
    let kernel = Kernel::builder()
        .with_config(config)
        .with_clock(Arc::new(clock.clone()))
        .build()
        .unwrap();
    (kernel, clock)
}

#[test]
fn test_transient_failure_retried_then_succeeds() {
    let (kernel, _clock) = kernel(3, 5);
    let calls = AtomicU32::new(0);

    let result = kernel.recovery().execute_blocking("transcribe", || {
        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(EngineError::Busy)
        } else {
            Ok("hello world")
        }
    });

    assert_eq!(result.unwrap(), "hello world");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(kernel.metrics().snapshot().retries, 2);
    assert_eq!(
        kernel.recovery().circuit_state("transcribe"),
        Some(CircuitState::Closed)
    );
}

#[test]
fn test_only_the_trial_decides_a_half_open_circuit() {
    let (kernel, clock) = kernel(0, 1);
    let recovery = kernel.recovery();
    let (admitted_tx, admitted_rx) = mpsc::channel::<()>();
    let (release_straggler, straggler_gate) = mpsc::channel::<()>();
    let (release_trial, trial_gate) = mpsc::channel::<()>();

    std::thread::scope(|s| {
        // Admitted while the circuit is still closed.
        let straggler = s.spawn(move || {
            recovery.execute_blocking("transcribe", || {
                admitted_tx.send(()).unwrap();
                straggler_gate.recv().unwrap();
                Ok::<_, EngineError>(())
            })
        });
        admitted_rx.recv().unwrap();

        let _ = recovery.execute_blocking("transcribe", || Err::<(), _>(EngineError::Busy));
        assert_eq!(recovery.circuit_state("transcribe"), Some(CircuitState::Open));
        clock.advance(Duration::from_secs(31));

        let trial = s.spawn(move || {
            recovery.execute_blocking("transcribe", || {
                trial_gate.recv().unwrap();
                Err::<(), _>(EngineError::Busy)
            })
        });
        while recovery.circuit_state("transcribe") != Some(CircuitState::HalfOpen) {
            std::thread::yield_now();
        }

        release_straggler.send(()).unwrap();
        assert!(straggler.join().unwrap().is_ok());
        assert_eq!(
            recovery.circuit_state("transcribe"),
            Some(CircuitState::HalfOpen)
        );

        release_trial.send(()).unwrap();
        assert!(trial.join().unwrap().is_err());
        assert_eq!(recovery.circuit_state("transcribe"), Some(CircuitState::Open));
    });
}

#[test]
fn test_exhausted_retries_return_last_error() {
    let (kernel, _clock) = kernel(3, 5);
    let calls = AtomicU32::new(0);

    let result: Result<(), _> = kernel.recovery().execute_blocking("transcribe", || {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(EngineError::Busy)
    });

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(result.unwrap_err().into_inner(), Some(EngineError::Busy));
}

#[test]
fn test_terminal_error_propagates_immediately() {
    let (kernel, _clock) = kernel(3, 1);
    let calls = AtomicU32::new(0);

    for _ in 0..3 {
        let result: Result<(), _> = kernel.recovery().execute_blocking("load_model", || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::ModelMissing)
        });
        match result {
            Err(RecoveryError::Operation(e)) => assert_eq!(e, EngineError::ModelMissing),
            other => panic!("expected operation error, got {other:?}"),
        }
    }

    // Terminal failures never open the circuit.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        kernel.recovery().circuit_state("load_model"),
        Some(CircuitState::Closed)
    );
}

#[test]
fn test_breaker_lifecycle() {
    let (kernel, clock) = kernel(0, 5);
    let calls = AtomicU32::new(0);
    let failing = || {
        calls.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>(EngineError::Busy)
    };

    for _ in 0..5 {
        let result = kernel.recovery().execute_blocking("transcribe", failing);
        assert!(!result.unwrap_err().is_circuit_open());
    }
    assert_eq!(
        kernel.recovery().circuit_state("transcribe"),
        Some(CircuitState::Open)
    );

    // Fails fast without touching the operation.
    let rejected = kernel.recovery().execute_blocking("transcribe", failing);
    match rejected {
        Err(RecoveryError::CircuitOpen {
            operation,
            retry_after,
        }) => {
            assert_eq!(operation, "transcribe");
            assert_eq!(retry_after, Duration::from_secs(30));
        }
        other => panic!("expected open circuit, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(kernel.metrics().snapshot().circuits_opened, 1);
    assert_eq!(kernel.metrics().snapshot().circuit_rejections, 1);

    // After the break, one trial is let through; success closes the circuit.
    clock.advance(Duration::from_secs(30));
    let trial = kernel.recovery().execute_blocking("transcribe", || Ok::<_, EngineError>(42));
    assert_eq!(trial.unwrap(), 42);
    assert_eq!(
        kernel.recovery().circuit_state("transcribe"),
        Some(CircuitState::Closed)
    );
}

#[test]
fn test_failed_trial_reopens() {
    let (kernel, clock) = kernel(0, 2);
    for _ in 0..2 {
        let _ = kernel
            .recovery()
            .execute_blocking("inject", || Err::<(), _>(EngineError::Busy));
    }
    clock.advance(Duration::from_secs(31));

    let trial = kernel
        .recovery()
        .execute_blocking("inject", || Err::<(), _>(EngineError::Busy));
    assert!(matches!(trial, Err(RecoveryError::Operation(EngineError::Busy))));
    assert_eq!(
        kernel.recovery().circuit_state("inject"),
        Some(CircuitState::Open)
    );

    let next = kernel
        .recovery()
        .execute_blocking("inject", || Ok::<_, EngineError>(()));
    assert!(next.unwrap_err().is_circuit_open());
}

#[test]
fn test_breakers_are_independent() {
    let (kernel, _clock) = kernel(0, 1);
    let _ = kernel
        .recovery()
        .execute_blocking("transcribe", || Err::<(), _>(EngineError::Busy));

    let other = kernel
        .recovery()
        .execute_blocking("inject", || Ok::<_, EngineError>("typed"));
    assert_eq!(other.unwrap(), "typed");

    let io = kernel
        .recovery()
        .execute_io_blocking("transcribe", || Ok(()));
    assert!(io.is_ok());

    let states: Vec<_> = kernel
        .recovery()
        .circuits()
        .into_iter()
        .map(|c| (c.name, c.state))
        .collect();
    assert_eq!(
        states,
        vec![
            ("inject".to_string(), CircuitState::Closed),
            ("io:transcribe".to_string(), CircuitState::Closed),
            ("transcribe".to_string(), CircuitState::Open),
        ]
    );

    assert!(kernel.recovery().reset_circuit("transcribe"));
    assert_eq!(
        kernel.recovery().circuit_state("transcribe"),
        Some(CircuitState::Closed)
    );
}

#[test]
fn test_io_not_found_is_terminal() {
    let (kernel, _clock) = kernel(3, 5);
    let calls = AtomicU32::new(0);

    let result: Result<Vec<u8>, _> = kernel.recovery().execute_io_blocking("read_settings", || {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(io::Error::new(io::ErrorKind::NotFound, "settings.toml"))
    });

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let err = result.unwrap_err().into_inner().unwrap();
    assert_eq!(err.kind(), io::ErrorKind::NotFound);
}

#[cfg(feature = "async")]
#[tokio::test(start_paused = true)]
async fn test_async_io_backoff_is_linear() {
    let clock = MockClock::new(Instant::now());
    let mut config = KernelConfig::default();
    config.recovery.max_retries = 3;
    config.recovery.io_delay_step_ms = 100;
    let kernel = Kernel::builder()
        .with_config(config)
        .with_clock(Arc::new(clock))
        .build()
        .unwrap();

    let start = tokio::time::Instant::now();
    let calls = AtomicU32::new(0);
    let result: Result<(), _> = kernel
        .recovery()
        .execute_io("save_history", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(io::Error::new(io::ErrorKind::TimedOut, "disk busy")) }
        })
        .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    // 100ms + 200ms + 300ms
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(600) && elapsed < Duration::from_millis(700));
}
