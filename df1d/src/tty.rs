//! Serial line bring-up. The link core only sees this through the
//! `Read + Write + Evented` contract; everything termios lives here.

use libc;
use mio;
use mio::unix::EventedFd;
use std::ffi::CString;
use std::io;
use std::os::unix::io::RawFd;

pub struct SerialLine {
    fd: RawFd,
}

impl SerialLine {
    /// Open and configure the device: raw mode, 8N1, non-blocking, both
    /// queues flushed.
    pub fn open(device: &str, baud: u32) -> io::Result<SerialLine> {
        let speed = baud_constant(baud)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "unsupported baud rate"))?;

        let path = CString::new(device)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "bad device path"))?;

        let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR | libc::O_NOCTTY | libc::O_NONBLOCK) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let line = SerialLine { fd };
        line.configure(speed)?;
        Ok(line)
    }

    fn configure(&self, speed: libc::speed_t) -> io::Result<()> {
        unsafe {
            let mut termios: libc::termios = std::mem::zeroed();

            if libc::tcgetattr(self.fd, &mut termios) != 0 {
                return Err(io::Error::last_os_error());
            }

            libc::cfmakeraw(&mut termios);

            // 8N1, receiver on, no modem control.
            termios.c_cflag &= !(libc::CSTOPB | libc::PARENB);
            termios.c_cflag |= libc::CLOCAL | libc::CREAD;
            termios.c_cc[libc::VMIN] = 0;
            termios.c_cc[libc::VTIME] = 0;

            if libc::cfsetispeed(&mut termios, speed) != 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::cfsetospeed(&mut termios, speed) != 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::tcsetattr(self.fd, libc::TCSANOW, &termios) != 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::tcflush(self.fd, libc::TCIOFLUSH) != 0 {
                return Err(io::Error::last_os_error());
            }
        }

        Ok(())
    }
}

fn baud_constant(baud: u32) -> Option<libc::speed_t> {
    match baud {
        110 => Some(libc::B110),
        300 => Some(libc::B300),
        600 => Some(libc::B600),
        1200 => Some(libc::B1200),
        2400 => Some(libc::B2400),
        9600 => Some(libc::B9600),
        19200 => Some(libc::B19200),
        38400 => Some(libc::B38400),
        _ => None,
    }
}

impl io::Read for SerialLine {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };

        if count < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(count as usize)
    }
}

impl io::Write for SerialLine {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let count = unsafe { libc::write(self.fd, buf.as_ptr() as *const libc::c_void, buf.len()) };

        if count < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(count as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl mio::Evented for SerialLine {
    fn register(
        &self,
        poll: &mio::Poll,
        token: mio::Token,
        interest: mio::Ready,
        opts: mio::PollOpt,
    ) -> io::Result<()> {
        EventedFd(&self.fd).register(poll, token, interest, opts)
    }

    fn reregister(
        &self,
        poll: &mio::Poll,
        token: mio::Token,
        interest: mio::Ready,
        opts: mio::PollOpt,
    ) -> io::Result<()> {
        EventedFd(&self.fd).reregister(poll, token, interest, opts)
    }

    fn deregister(&self, poll: &mio::Poll) -> io::Result<()> {
        EventedFd(&self.fd).deregister(poll)
    }
}

impl Drop for SerialLine {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
