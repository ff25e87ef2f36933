#![cfg(target_os = "linux")]

use std::{
    collections::HashMap,
    io::prelude::*,
    net::{TcpListener, TcpStream},
    os::unix::io::{AsRawFd, FromRawFd},
    time::Duration,
};

use ringio::{
    Buffer, ClientAddress, Config, Error, Fixed, Op, Ring, IOSQE_IO_LINK,
};

const HELLO: &[u8] = b"hello world...";

fn ring(depth: u32) -> Option<Ring> {
    if !ringio::is_available() {
        eprintln!("io_uring is not available, skipping");
        return None;
    }
    Some(Config { depth, ..Config::default() }.start().unwrap())
}

/// Reaps `n` completions into a map from tag to result.
fn reap(ring: &mut Ring, n: usize) -> HashMap<u64, i32> {
    let mut results = HashMap::new();
    for _ in 0..n {
        let cqe = ring.wait_cqe().unwrap();
        results.insert(cqe.user_data(), cqe.raw_result());
        ring.cqe_seen();
    }
    results
}

#[test]
fn nop_round_trip() {
    let Some(mut ring) = ring(8) else { return };
    assert_eq!(ring.sq_entries(), 8);

    for tag in 1..=3 {
        let sqe = ring.get_sqe().unwrap();
        sqe.prepare(&Op::Nop);
        sqe.set_user_data(tag);
    }

    assert_eq!(ring.submit_and_wait(3).unwrap(), 3);
    assert_eq!(ring.cq_ready(), 3);

    let mut tags = vec![];
    for _ in 0..3 {
        let cqe = ring.peek_cqe().unwrap();
        assert!(cqe.raw_result() >= 0);
        tags.push(cqe.user_data());
        ring.cq_advance(1);
    }
    tags.sort_unstable();
    assert_eq!(tags, vec![1, 2, 3]);

    assert!(matches!(ring.peek_cqe(), Err(Error::NoEvent)));
    ring.close().unwrap();
}

#[test]
fn batch_advance() {
    let Some(mut ring) = ring(8) else { return };
    for tag in 0..8 {
        let sqe = ring.get_sqe().unwrap();
        sqe.prepare(&Op::Nop);
        sqe.set_user_data(tag);
    }
    assert!(matches!(ring.get_sqe(), Err(Error::QueueFull)));

    ring.submit_and_wait(8).unwrap();
    assert_eq!(ring.cq_ready(), 8);
    ring.cq_advance(8);
    assert_eq!(ring.cq_ready(), 0);
    assert_eq!(ring.sq_space_left(), 8);
}

#[test]
fn timeout_elapses_without_completions() {
    let Some(mut ring) = ring(4) else { return };
    let err = ring
        .wait_cqe_timeout(1, Duration::from_millis(10))
        .unwrap_err();
    assert!(matches!(err, Error::Timeout), "{:?}", err);

    // the ring is still usable afterwards
    let sqe = ring.get_sqe().unwrap();
    sqe.prepare(&Op::Nop);
    sqe.set_user_data(1);
    ring.submit().unwrap();
    let cqe = ring
        .wait_cqes(1, Some(Duration::from_secs(5)), None)
        .unwrap();
    assert_eq!(cqe.user_data(), 1);
}

#[test]
fn accept_reports_the_caller_tag() {
    let Some(mut ring) = ring(8) else { return };
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let mut client_addr = ClientAddress::new();

    let sqe = ring.get_sqe().unwrap();
    sqe.prepare(&client_addr.accept_op(
        listener.as_raw_fd(),
        libc::SOCK_CLOEXEC as u32,
    ));
    sqe.set_user_data(77);

    let sqe = ring.get_sqe().unwrap();
    sqe.prepare(&Op::Nop);
    sqe.set_user_data(5);

    ring.submit().unwrap();

    let _client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();

    let results = reap(&mut ring, 2);
    assert_eq!(results[&5], 0);

    let accepted = results[&77];
    assert!(accepted >= 0, "accept failed: {}", accepted);
    assert_eq!(i32::from(client_addr.family()), libc::AF_INET);
    assert!(!client_addr.is_empty());

    // take ownership so the socket is closed
    drop(unsafe { TcpStream::from_raw_fd(accepted) });
}

#[test]
fn linked_write_fsync_read() {
    let Some(mut ring) = ring(8) else { return };
    let file = tempfile::tempfile().unwrap();
    let fd = file.as_raw_fd();

    let mut out = Buffer::new(HELLO.len()).unwrap();
    out.write(HELLO).unwrap();
    let mut input = Fixed::new(HELLO.len()).unwrap();

    let sqe = ring.get_sqe().unwrap();
    sqe.prepare(&Op::Write {
        fd,
        buf: out.as_ptr(),
        len: out.len() as u32,
        offset: 0,
    });
    sqe.set_flags(IOSQE_IO_LINK);
    sqe.set_user_data(1);

    let sqe = ring.get_sqe().unwrap();
    sqe.prepare(&Op::Fsync { fd, datasync: true });
    sqe.set_flags(IOSQE_IO_LINK);
    sqe.set_user_data(2);

    let sqe = ring.get_sqe().unwrap();
    sqe.prepare(&Op::Read {
        fd,
        buf: input.spare_capacity_mut().as_mut_ptr(),
        len: HELLO.len() as u32,
        offset: 0,
    });
    sqe.set_user_data(3);

    ring.submit_and_wait(3).unwrap();
    let results = reap(&mut ring, 3);
    assert_eq!(results[&1], HELLO.len() as i32);
    assert_eq!(results[&2], 0);
    assert_eq!(results[&3], HELLO.len() as i32);

    input.set_len(HELLO.len()).unwrap();
    assert_eq!(input.bytes(), HELLO);
}

#[test]
fn registered_buffers() {
    let Some(mut ring) = ring(4) else { return };
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(HELLO).unwrap();

    let mut fixed = Fixed::new(64).unwrap();
    ring.register_buffers(std::slice::from_ref(&fixed)).unwrap();

    let sqe = ring.get_sqe().unwrap();
    sqe.prepare(&Op::ReadFixed {
        fd: file.as_raw_fd(),
        buf: fixed.as_mut_ptr(),
        len: 64,
        offset: 0,
        buf_index: 0,
    });
    sqe.set_user_data(9);
    ring.submit_and_wait(1).unwrap();

    let cqe = ring.wait_cqe().unwrap();
    assert_eq!(cqe.user_data(), 9);
    let n = cqe.result().unwrap() as usize;
    ring.cqe_seen();

    fixed.set_len(n).unwrap();
    assert_eq!(fixed.bytes(), HELLO);

    ring.unregister_buffers().unwrap();
}

#[test]
fn registered_ring_fd_is_optional() {
    if !ringio::is_available() {
        return;
    }
    let mut ring = Config {
        depth: 4,
        register_ring_fd: true,
        ..Config::default()
    }
    .start()
    .unwrap();

    let sqe = ring.get_sqe().unwrap();
    sqe.prepare(&Op::Nop);
    sqe.set_user_data(42);
    ring.submit_and_wait(1).unwrap();
    assert_eq!(ring.wait_cqe().unwrap().user_data(), 42);
    ring.cqe_seen();
}

#[test]
fn kernel_errors_pass_through() {
    let Some(mut ring) = ring(4) else { return };
    let sqe = ring.get_sqe().unwrap();
    sqe.prepare(&Op::Close { fd: -1 });
    sqe.set_user_data(13);
    ring.submit_and_wait(1).unwrap();

    let cqe = ring.wait_cqe().unwrap();
    assert_eq!(cqe.user_data(), 13);
    let err = cqe.result().unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EBADF));
}
