#![cfg(target_os = "linux")]

use std::io::Write;

use ringio::{page_size, Buffer, Error, Fixed, FixedPool, Pool};

#[test]
fn growth_keeps_earlier_writes() {
    let mut buf = Buffer::new(512).unwrap();
    let first = [1_u8; 512];
    buf.write(&first).unwrap();
    buf.write(&[2; 600]).unwrap();
    assert_eq!(buf.len(), 1112);
    assert_eq!(&buf.bytes()[..512], &first[..]);

    let big = vec![3; 4 * page_size()];
    buf.write_all(&big).unwrap();
    assert_eq!(buf.len(), 1112 + big.len());
    assert_eq!(&buf.bytes()[..512], &first[..]);
    assert_eq!(&buf.bytes()[1112..], &big[..]);
    assert!(buf.capacity() >= buf.len());
    assert_eq!(buf.capacity() % page_size(), 0);
    buf.close().unwrap();
}

#[test]
fn fixed_rejects_overflow() {
    let mut buf = Fixed::new(page_size()).unwrap();
    buf.write(b"abc").unwrap();
    let too_big = vec![0; page_size()];
    match buf.write(&too_big) {
        Err(Error::TooLarge { len, remaining }) => {
            assert_eq!(len, page_size());
            assert_eq!(remaining, page_size() - 3);
        }
        other => panic!("expected TooLarge, got {:?}", other),
    }
    assert_eq!(buf.bytes(), b"abc");
}

#[test]
fn pools_hand_back_empty_buffers() {
    let pool = Pool::new(512);
    let buf = pool.get().unwrap();
    let capacity = buf.capacity();
    pool.put(buf);
    let buf = pool.get().unwrap();
    assert_eq!(buf.len(), 0);
    assert_eq!(buf.capacity(), capacity);

    let fixed_pool = FixedPool::new(512);
    let mut fixed = fixed_pool.get().unwrap();
    fixed.write(b"scratch").unwrap();
    fixed_pool.put(fixed);
    assert!(fixed_pool.get().unwrap().is_empty());
}
