#![allow(unsafe_code)]

use std::io;

use libc::{c_int, c_long, c_uint, c_void, syscall};

use super::{io_uring_params, Measure, M};

pub(crate) fn setup(
    entries: c_uint,
    p: &mut io_uring_params,
) -> io::Result<c_int> {
    let ret = unsafe {
        syscall(
            libc::SYS_io_uring_setup,
            entries as c_long,
            p as *mut io_uring_params as c_long,
        ) as c_int
    };
    if ret < 0 {
        let err = io::Error::last_os_error();
        return Err(err);
    }
    Ok(ret)
}

/// `io_uring_enter2`: `arg` is either a signal set or, when
/// `IORING_ENTER_EXT_ARG` is set, an `io_uring_getevents_arg`,
/// and `arg_sz` is the size of whichever it is.
pub(crate) fn enter(
    fd: c_int,
    to_submit: c_uint,
    min_complete: c_uint,
    flags: c_uint,
    arg: *const c_void,
    arg_sz: usize,
) -> io::Result<c_uint> {
    let _measure = Measure::new(&M.enter);
    tracing::trace!(fd, to_submit, min_complete, flags, "io_uring_enter");
    loop {
        // this is strapped into an interruption
        // diaper loop because it's the one that
        // might actually block a lot
        let ret = unsafe {
            syscall(
                libc::SYS_io_uring_enter,
                fd as c_long,
                to_submit as c_long,
                min_complete as c_long,
                flags as c_long,
                arg as c_long,
                arg_sz as c_long,
            ) as c_int
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        } else {
            #[allow(clippy::cast_sign_loss)]
            return Ok(ret as c_uint);
        }
    }
}

pub(crate) fn register(
    fd: c_int,
    opcode: c_uint,
    arg: *const c_void,
    nr_args: c_uint,
) -> io::Result<c_uint> {
    let ret = unsafe {
        syscall(
            libc::SYS_io_uring_register,
            fd as c_long,
            opcode as c_long,
            arg as c_long,
            nr_args as c_long,
        ) as c_int
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    #[allow(clippy::cast_sign_loss)]
    Ok(ret as c_uint)
}

pub(crate) fn close(fd: c_int) -> io::Result<()> {
    if unsafe { libc::close(fd) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
