use std::sync::Mutex;

use super::*;
use crate::result::buffer_pool::BufferPool;

fn store() -> (ResultStore, SharedBufferPool) {
    let pool: SharedBufferPool = Arc::new(Mutex::new(BufferPool::default()));
    (ResultStore::new(Arc::clone(&pool), Precision::Full), pool)
}

fn live(pool: &SharedBufferPool) -> u64 {
    pool.lock().unwrap().stats().live_buffers
}

#[test]
fn release_frees_exactly_at_zero() {
    let (mut s, pool) = store();
    let id = s.create(ResultType::Color);
    s.set_reference_count(id, 2);
    let buf = s.acquire_buffer(Domain::new(4, 4), ResultType::Color);
    s.allocate_image(id, buf);
    assert_eq!(live(&pool), 1);

    s.release(id);
    assert!(s.get(id).is_allocated());
    s.release(id);
    assert!(!s.get(id).is_allocated());
    assert_eq!(live(&pool), 0);
}

#[test]
fn shared_storage_is_aliased_and_returned_by_last_sharer() {
    let (mut s, pool) = store();
    let src = s.create(ResultType::Float);
    let dst = s.create(ResultType::Float);
    let buf = s.acquire_buffer(Domain::new(2, 2), ResultType::Float);
    s.allocate_image(src, buf);
    s.share_data(dst, src);

    let a = s.get(src).image().unwrap();
    let b = s.get(dst).image().unwrap();
    assert!(Arc::ptr_eq(a, b));

    s.free(src);
    assert_eq!(live(&pool), 1);
    assert!(s.get(dst).is_allocated());
    s.free(dst);
    assert_eq!(live(&pool), 0);
}

#[test]
fn share_keeps_target_reference_count() {
    let (mut s, _pool) = store();
    let src = s.create(ResultType::Float);
    let dst = s.create(ResultType::Float);
    s.set_reference_count(src, 5);
    s.set_reference_count(dst, 1);
    s.allocate_single(src, Value::Float(3.0));
    s.share_data(dst, src);
    assert_eq!(s.get(dst).reference_count(), 1);
    assert_eq!(s.get(dst).single_value(), Some(Value::Float(3.0)));
}

#[test]
fn share_across_kinds_converts() {
    let (mut s, pool) = store();
    let src = s.create(ResultType::Float);
    let dst = s.create(ResultType::Color);
    let mut buf = s.acquire_buffer(Domain::new(1, 1), ResultType::Float);
    buf.data_mut()[0] = 0.5;
    s.allocate_image(src, buf);
    s.share_data(dst, src);
    assert_eq!(
        s.get(dst).image().unwrap().pixel(0),
        Value::Color([0.5, 0.5, 0.5, 1.0])
    );
    s.free(src);
    s.free(dst);
    assert_eq!(live(&pool), 0);
}

#[test]
fn invalid_results_are_allocated_and_read_as_zero() {
    let (mut s, _pool) = store();
    let id = s.create(ResultType::Vector);
    s.allocate_invalid(id);
    let e = s.get(id);
    assert!(e.is_allocated());
    assert!(e.is_invalid());
    assert!(e.is_single_value());
    assert_eq!(e.single_value(), Some(Value::Vector([0.0; 3])));
    assert_eq!(s.live_results(), 1);
}

#[test]
fn single_values_are_converted_to_result_kind() {
    let (mut s, _pool) = store();
    let id = s.create(ResultType::Color);
    s.allocate_single(id, Value::Float(1.0));
    assert_eq!(s.view(id).sample(10, 10), Value::Color([1.0, 1.0, 1.0, 1.0]));
}
