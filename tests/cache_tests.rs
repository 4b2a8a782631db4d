mod common;

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use common::{CountingBackend, GatedBackend, descriptor, payload, service_with};
use xcache::{CacheConfig, CacheError, ErrorKind, ServiceConfig};

#[test]
fn concurrent_identical_requests_compile_once() -> Result<()> {
    const REQUESTS: usize = 8;

    let service = Arc::new(service_with(
        CountingBackend::slow(Duration::from_millis(50)),
        &ServiceConfig::default(),
    ));
    let request = payload(&descriptor("add"));
    let barrier = Arc::new(Barrier::new(REQUESTS));

    let workers: Vec<_> = (0..REQUESTS)
        .map(|_| {
            let service = Arc::clone(&service);
            let request = request.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                service.compile(&request)
            })
        })
        .collect();

    let mut handles = Vec::new();
    for worker in workers {
        let output = worker.join().expect("compile thread panicked")?;
        handles.push(output.handle);
    }

    assert_eq!(service.backend().calls(), 1);
    assert!(handles.iter().all(|handle| *handle == handles[0]));
    assert_eq!(service.cache().ref_count(handles[0])?, REQUESTS);

    let stats = service.cache().stats();
    assert_eq!(stats.live_entries, 1);
    assert_eq!(stats.pending_compiles, 0);
    assert_eq!(stats.metrics.compiles, 1);
    Ok(())
}

#[test]
fn two_requests_need_two_releases() -> Result<()> {
    let service = service_with(CountingBackend::default(), &ServiceConfig::default());
    let request = payload(&descriptor("add"));

    let first = service.compile(&request)?.handle;
    let second = service.compile(&request)?.handle;
    assert_eq!(first, second);
    assert_eq!(service.backend().calls(), 1);

    service.release_handles(&[first])?;
    assert!(service.cache().lookup(first).is_ok());

    service.release_handles(&[second])?;
    let err = service.cache().lookup(first).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

#[test]
fn released_program_is_revived_under_a_new_handle() -> Result<()> {
    let service = service_with(CountingBackend::default(), &ServiceConfig::default());
    let request = payload(&descriptor("add"));

    let first = service.compile(&request)?.handle;
    service.release_handles(&[first])?;
    let second = service.compile(&request)?.handle;

    assert_ne!(first, second);
    assert_eq!(service.backend().calls(), 1);
    assert!(matches!(
        service.cache().lookup(first),
        Err(CacheError::NotFound(handle)) if handle == first
    ));
    Ok(())
}

#[test]
fn failed_compile_is_not_cached() -> Result<()> {
    let service = service_with(CountingBackend::failing(1), &ServiceConfig::default());
    let request = payload(&descriptor("add"));

    let err = service.compile(&request).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackendCompileFailure);
    assert_eq!(service.cache().stats().live_entries, 0);

    let output = service.compile(&request)?;
    assert_eq!(service.backend().calls(), 2);
    assert_eq!(service.cache().ref_count(output.handle)?, 1);
    Ok(())
}

#[test]
fn waiters_share_the_compile_error() -> Result<()> {
    const WAITERS: u64 = 3;

    let (backend, started, resume) = GatedBackend::failing_once();
    let service = Arc::new(service_with(backend, &ServiceConfig::default()));
    let request = payload(&descriptor("add"));

    let spawn_request = || {
        let service = Arc::clone(&service);
        let request = request.clone();
        thread::spawn(move || service.compile(&request))
    };

    let compiler = spawn_request();
    started.recv()?;
    let waiters: Vec<_> = (0..WAITERS).map(|_| spawn_request()).collect();

    // Each caller that joins the in-flight compile counts as a hit.
    while service.cache().stats().metrics.hits < WAITERS {
        thread::sleep(Duration::from_millis(1));
    }
    resume.send(())?;

    let expected = compiler
        .join()
        .expect("compile thread panicked")
        .unwrap_err();
    assert_eq!(expected.kind(), ErrorKind::BackendCompileFailure);
    for waiter in waiters {
        let err = waiter.join().expect("compile thread panicked").unwrap_err();
        assert_eq!(err, expected);
    }
    assert_eq!(service.backend().calls(), 1);
    assert_eq!(service.cache().stats().pending_compiles, 0);
    assert_eq!(service.cache().stats().live_references, 0);

    let output = service.compile(&request)?;
    assert_eq!(service.backend().calls(), 2);
    assert_eq!(service.cache().ref_count(output.handle)?, 1);
    Ok(())
}

#[test]
fn bounded_cache_evicts_released_programs() -> Result<()> {
    let config = ServiceConfig {
        cache: CacheConfig::bounded(1),
        ..ServiceConfig::default()
    };
    let service = service_with(CountingBackend::default(), &config);
    let add = payload(&descriptor("add"));
    let mul = payload(&descriptor("mul"));

    let first = service.compile(&add)?.handle;
    let err = service.compile(&mul).unwrap_err();
    assert!(matches!(err, CacheError::CacheFull { max_entries: 1 }));
    assert_eq!(service.backend().calls(), 1);

    service.release_handles(&[first])?;
    let second = service.compile(&mul)?.handle;
    assert_eq!(service.backend().calls(), 2);
    assert_eq!(service.cache().stats().metrics.evictions, 1);

    service.release_handles(&[second])?;
    service.compile(&add)?;
    assert_eq!(service.backend().calls(), 3);
    Ok(())
}
