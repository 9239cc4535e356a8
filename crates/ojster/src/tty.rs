//! Reading a secret from stdin with terminal echo disabled.

use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal, Read, Write};
use std::os::fd::{AsRawFd, RawFd};

use zeroize::Zeroizing;

/// Read stdin until EOF.
///
/// When stdin is a terminal, `prompt` is shown on `/dev/tty` (or stderr if
/// that cannot be opened) and echo is turned off for the duration of the
/// read. Piped input is read as-is with no prompt.
///
/// # Errors
///
/// Returns the underlying read error.
pub fn read_secret(prompt: &str) -> io::Result<Zeroizing<Vec<u8>>> {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        return read_all(stdin.lock());
    }

    match OpenOptions::new().read(true).write(true).open("/dev/tty") {
        Ok(mut tty) => {
            tty.write_all(prompt.as_bytes())?;
            let mut echo = tty.try_clone()?;
            read_hidden(&mut tty, &mut echo)
        }
        Err(_) => {
            eprint!("{prompt}");
            let fd = stdin.as_raw_fd();
            read_hidden_fd(fd, &mut stdin.lock(), &mut io::stderr())
        }
    }
}

fn read_hidden(file: &mut File, echo: &mut impl Write) -> io::Result<Zeroizing<Vec<u8>>> {
    let fd = file.as_raw_fd();
    read_hidden_fd(fd, file, echo)
}

/// Disable echo on `fd`, read `reader` to EOF, restore the terminal.
/// Falls back to a plain read if `fd` is not a terminal.
fn read_hidden_fd(
    fd: RawFd,
    reader: &mut impl Read,
    echo: &mut impl Write,
) -> io::Result<Zeroizing<Vec<u8>>> {
    let Some(_guard) = EchoGuard::disable(fd) else {
        return read_all(reader);
    };
    let secret = read_all(reader);
    // Ctrl-D leaves the cursor on the prompt line.
    let _ = writeln!(echo);
    secret
}

fn read_all(mut reader: impl Read) -> io::Result<Zeroizing<Vec<u8>>> {
    let mut buf = Zeroizing::new(Vec::new());
    reader.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Restores the saved terminal attributes on drop.
struct EchoGuard {
    fd: RawFd,
    saved: libc::termios,
}

impl EchoGuard {
    fn disable(fd: RawFd) -> Option<Self> {
        // SAFETY: termios is plain data; tcgetattr fully initialises it on success.
        let mut saved: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &mut saved) } != 0 {
            return None;
        }
        let mut quiet = saved;
        quiet.c_lflag &= !libc::ECHO;
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &quiet) } != 0 {
            return None;
        }
        Some(Self { fd, saved })
    }
}

impl Drop for EchoGuard {
    fn drop(&mut self) {
        // SAFETY: restores attributes previously read from the same fd.
        unsafe {
            libc::tcsetattr(self.fd, libc::TCSANOW, &self.saved);
        }
    }
}
