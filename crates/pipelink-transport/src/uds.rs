use std::io::ErrorKind;
use std::os::fd::AsRawFd;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::traits::IpcStream;

/// Unix domain socket listener backing a named pipe endpoint.
///
/// Many clients may connect to one listener; every accepted connection is an
/// independent [`IpcStream`]. The socket file is removed on drop as long as
/// it is still the file this listener created.
///
/// The listening socket is non-blocking underneath; [`accept_timeout`]
/// waits for a client with `poll(2)`, which lets an accept loop check for
/// shutdown between waits instead of depending on a wake-up connection.
///
/// [`accept_timeout`]: UnixDomainSocket::accept_timeout
pub struct UnixDomainSocket {
    listener: UnixListener,
    endpoint: Endpoint,
    created_inode: (u64, u64),
}

impl UnixDomainSocket {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;

    /// Bind and listen on the endpoint's socket path.
    ///
    /// A stale socket left at the path is replaced. Any other kind of file is
    /// left alone and binding fails.
    pub fn bind(endpoint: &Endpoint) -> Result<Self> {
        Self::bind_with_mode(endpoint, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind with an explicit permission mode for the socket file.
    pub fn bind_with_mode(endpoint: &Endpoint, mode: u32) -> Result<Self> {
        let path = endpoint.path().to_path_buf();
        check_path_len(&path)?;

        let bind_err = |source: std::io::Error| TransportError::Bind {
            path: path.clone(),
            source,
        };

        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if !metadata.file_type().is_socket() {
                return Err(bind_err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(bind_err)?;
        }

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).map_err(bind_err)?;
        let created = std::fs::symlink_metadata(&path).map_err(bind_err)?;

        info!(pipe = endpoint.name(), ?path, "listening on named endpoint");

        Ok(Self {
            listener,
            endpoint: endpoint.clone(),
            created_inode: (created.dev(), created.ino()),
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<IpcStream> {
        loop {
            if let Some(stream) = self.accept_within(None)? {
                return Ok(stream);
            }
        }
    }

    /// Wait up to `timeout` for a client. `Ok(None)` when none arrived.
    pub fn accept_timeout(&self, timeout: Duration) -> Result<Option<IpcStream>> {
        self.accept_within(Some(timeout))
    }

    fn accept_within(&self, timeout: Option<Duration>) -> Result<Option<IpcStream>> {
        if !self.wait_readable(timeout)? {
            return Ok(None);
        }
        match self.listener.accept() {
            Ok((stream, _addr)) => {
                // BSD-derived systems hand out sockets that inherit O_NONBLOCK.
                stream.set_nonblocking(false).map_err(TransportError::Accept)?;
                debug!(pipe = self.endpoint.name(), "accepted connection");
                Ok(Some(IpcStream::from_unix(stream)))
            }
            // The client gave up between poll and accept.
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(None),
            Err(err) => Err(TransportError::Accept(err)),
        }
    }

    fn wait_readable(&self, timeout: Option<Duration>) -> Result<bool> {
        let millis = match timeout {
            Some(timeout) => libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX),
            None => -1,
        };
        let mut fds = libc::pollfd {
            fd: self.listener.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: `fds` is one valid, writable pollfd for the whole call and
        // the descriptor stays open because `self` borrows the listener.
        let rc = unsafe { libc::poll(&mut fds, 1, millis) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(TransportError::Accept(err));
        }
        Ok(rc > 0)
    }

    /// Connect to a listening endpoint (blocking).
    pub fn connect(endpoint: &Endpoint) -> Result<IpcStream> {
        let path = endpoint.path();
        check_path_len(path)?;
        let stream = UnixStream::connect(path).map_err(|source| TransportError::Connect {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(pipe = endpoint.name(), "connected to named endpoint");
        Ok(IpcStream::from_unix(stream))
    }

    /// The endpoint this socket is bound to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

/// Capacity of `sockaddr_un.sun_path`, including the trailing NUL.
fn sun_path_capacity() -> usize {
    // SAFETY: `sockaddr_un` is plain old data, so all-zero bytes are a valid value.
    let addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_path.len()
}

fn check_path_len(path: &Path) -> Result<()> {
    let len = path.as_os_str().len();
    let max = sun_path_capacity();
    if len >= max {
        return Err(TransportError::PathTooLong {
            path: PathBuf::from(path),
            len,
            max,
        });
    }
    Ok(())
}

impl Drop for UnixDomainSocket {
    fn drop(&mut self) {
        let path = self.endpoint.path();
        let Ok(metadata) = std::fs::symlink_metadata(path) else {
            return;
        };
        let (dev, ino) = self.created_inode;
        if metadata.file_type().is_socket() && metadata.dev() == dev && metadata.ino() == ino {
            debug!(?path, "cleaning up socket file");
            let _ = std::fs::remove_file(path);
        } else {
            debug!(?path, "socket path identity changed; skipping cleanup");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn temp_endpoint(tag: &str) -> (PathBuf, Endpoint) {
        let dir = std::env::temp_dir().join(format!(
            "pipelink-uds-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let endpoint = Endpoint::from_path(dir.join("test.sock"));
        (dir, endpoint)
    }

    #[test]
    fn test_bind_accept_connect() {
        let (dir, endpoint) = temp_endpoint("basic");

        let listener = UnixDomainSocket::bind(&endpoint).unwrap();
        assert!(endpoint.path().exists());

        let client_endpoint = endpoint.clone();
        let handle = std::thread::spawn(move || {
            let mut client = UnixDomainSocket::connect(&client_endpoint).unwrap();
            client.write_all(b"hello").unwrap();
        });

        let mut server = listener.accept().unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        handle.join().unwrap();

        drop(listener);
        assert!(
            !endpoint.path().exists(),
            "socket file should be cleaned up on drop"
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_many_clients_one_listener() {
        let (dir, endpoint) = temp_endpoint("many");
        let listener = UnixDomainSocket::bind(&endpoint).unwrap();

        let clients: Vec<_> = (0..3)
            .map(|_| UnixDomainSocket::connect(&endpoint).unwrap())
            .collect();
        for _ in 0..clients.len() {
            listener.accept().unwrap();
        }

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_connect_missing_endpoint_is_retryable() {
        let (dir, endpoint) = temp_endpoint("missing");
        let err = UnixDomainSocket::connect(&endpoint).unwrap_err();
        assert!(err.is_endpoint_missing());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_accept_timeout_returns_none_without_clients() {
        let (dir, endpoint) = temp_endpoint("timeout");
        let listener = UnixDomainSocket::bind(&endpoint).unwrap();

        let started = std::time::Instant::now();
        let accepted = listener.accept_timeout(Duration::from_millis(30)).unwrap();
        assert!(accepted.is_none());
        assert!(started.elapsed() >= Duration::from_millis(20));

        let mut client = UnixDomainSocket::connect(&endpoint).unwrap();
        let mut server = listener
            .accept_timeout(Duration::from_secs(5))
            .unwrap()
            .expect("pending client should be accepted");
        client.write_all(b"ok").unwrap();
        let mut buf = [0u8; 2];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ok");

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_accept_timeout_survives_unlinked_socket_file() {
        let (dir, endpoint) = temp_endpoint("unlinked");
        let listener = UnixDomainSocket::bind(&endpoint).unwrap();
        std::fs::remove_file(endpoint.path()).unwrap();

        let accepted = listener.accept_timeout(Duration::from_millis(20)).unwrap();
        assert!(accepted.is_none());

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_path_limit_matches_sockaddr() {
        let max = sun_path_capacity();
        assert!(max >= 92, "sun_path unexpectedly small: {max}");

        let fits = "/".to_string() + &"a".repeat(max - 2);
        assert!(check_path_len(Path::new(&fits)).is_ok());
        let too_long = "/".to_string() + &"a".repeat(max - 1);
        assert!(matches!(
            check_path_len(Path::new(&too_long)),
            Err(TransportError::PathTooLong { max: m, .. }) if m == max
        ));
    }

    #[test]
    fn test_path_too_long() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        let result = UnixDomainSocket::bind(&Endpoint::from_path(long_path));
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[test]
    fn test_bind_default_permissions_hardened() {
        let (dir, endpoint) = temp_endpoint("perms");

        let listener = UnixDomainSocket::bind(&endpoint).unwrap();
        let mode = std::fs::metadata(endpoint.path())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600);

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_bind_rejects_existing_non_socket_file() {
        let (dir, endpoint) = temp_endpoint("file");
        std::fs::write(endpoint.path(), b"regular-file").unwrap();

        let result = UnixDomainSocket::bind(&endpoint);
        assert!(matches!(result, Err(TransportError::Bind { .. })));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_drop_does_not_remove_replaced_path() {
        let (dir, endpoint) = temp_endpoint("drop-race");

        let listener = UnixDomainSocket::bind(&endpoint).unwrap();
        std::fs::remove_file(endpoint.path()).unwrap();
        std::fs::write(endpoint.path(), b"replacement-file").unwrap();

        drop(listener);
        assert!(
            endpoint.path().exists(),
            "drop must not remove path if inode identity changed"
        );

        let _ = std::fs::remove_dir_all(&dir);
    }
}
