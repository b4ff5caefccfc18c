use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::traits::IpcStream;

/// A bound Unix domain socket listener.
///
/// The socket file is removed on drop, unless another process replaced it in
/// the meantime (checked by inode identity).
pub struct UnixDomainSocket {
    listener: UnixListener,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
}

impl UnixDomainSocket {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// `sockaddr_un.sun_path` is 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind and listen on the socket path of an endpoint.
    pub fn bind_endpoint(endpoint: &Endpoint) -> Result<Self> {
        Self::bind(endpoint.path())
    }

    /// Bind and listen on a filesystem-path Unix domain socket.
    ///
    /// If a socket file already exists at `path` it is treated as stale and
    /// replaced. Any other kind of file is left alone and the bind fails.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind with an explicit permission mode for the socket file.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

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
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(bind_err)?;
        let created = std::fs::symlink_metadata(&path).map_err(bind_err)?;

        info!(?path, "listening on unix domain socket");

        Ok(Self {
            listener,
            created_inode: Some((created.dev(), created.ino())),
            path,
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<IpcStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        // BSD-derived systems let accepted sockets inherit O_NONBLOCK.
        stream.set_nonblocking(false)?;
        debug!(path = ?self.path, "accepted connection");
        Ok(IpcStream::from_unix(stream))
    }

    /// Connect to the socket path of an endpoint.
    pub fn connect_endpoint(endpoint: &Endpoint) -> Result<IpcStream> {
        Self::connect(endpoint.path())
    }

    /// Connect to a listening Unix domain socket (blocking).
    pub fn connect(path: impl AsRef<Path>) -> Result<IpcStream> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|e| TransportError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!(?path, "connected to unix domain socket");
        Ok(IpcStream::from_unix(stream))
    }

    /// Switch the listener between blocking and non-blocking accept.
    ///
    /// In non-blocking mode [`accept`](Self::accept) fails with
    /// `ErrorKind::WouldBlock` when no connection is pending. Accepted streams
    /// are always returned in blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.listener.set_nonblocking(nonblocking).map_err(Into::into)
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixDomainSocket {
    fn drop(&mut self) {
        let Some((expected_dev, expected_ino)) = self.created_inode else {
            return;
        };
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.path, "cleaning up socket file");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(path = ?self.path, "socket path identity changed; skipping cleanup");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn test_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "farmipc-uds-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn bind_accept_connect() {
        let dir = test_dir("roundtrip");
        let endpoint = Endpoint::from_path(dir.join("state"));

        let listener = UnixDomainSocket::bind_endpoint(&endpoint).unwrap();
        assert!(endpoint.path().exists());

        let client_endpoint = endpoint.clone();
        let handle = std::thread::spawn(move || {
            let mut client = UnixDomainSocket::connect_endpoint(&client_endpoint).unwrap();
            client.write_all(b"RUNNING").unwrap();
        });

        let mut server = listener.accept().unwrap();
        let mut buf = [0u8; 7];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"RUNNING");
        handle.join().unwrap();

        drop(listener);
        assert!(!endpoint.path().exists(), "socket file should be removed on drop");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn connect_without_listener_reports_peer_absent() {
        let dir = test_dir("absent");
        let err = UnixDomainSocket::connect(dir.join("nobody")).unwrap_err();
        assert!(err.is_peer_absent());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn rebind_replaces_stale_socket() {
        let dir = test_dir("stale");
        let path = dir.join("command");

        let first = UnixDomainSocket::bind(&path).unwrap();
        let second = UnixDomainSocket::bind(&path).unwrap();

        // Dropping the first listener must not unlink the second one's file.
        drop(first);
        assert!(path.exists());
        drop(second);
        assert!(!path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn nonblocking_accept_reports_would_block() {
        let dir = test_dir("nonblocking");
        let listener = UnixDomainSocket::bind(dir.join("stats")).unwrap();
        listener.set_nonblocking(true).unwrap();

        let err = listener.accept().unwrap_err();
        assert!(matches!(
            err.io_source().map(|e| e.kind()),
            Some(std::io::ErrorKind::WouldBlock)
        ));

        let _client = UnixDomainSocket::connect(listener.path()).unwrap();
        let mut accepted = None;
        for _ in 0..100 {
            if let Ok(stream) = listener.accept() {
                accepted = Some(stream);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(accepted.is_some(), "pending connection should be accepted");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn path_too_long() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        let result = UnixDomainSocket::bind(&long_path);
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[test]
    fn bind_rejects_existing_non_socket_file() {
        let dir = test_dir("regular");
        let path = dir.join("not-a-socket");
        std::fs::write(&path, b"regular-file").unwrap();

        let result = UnixDomainSocket::bind(&path);
        assert!(matches!(result, Err(TransportError::Bind { .. })));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn default_permissions_are_owner_only() {
        let dir = test_dir("perms");
        let path = dir.join("perm");

        let listener = UnixDomainSocket::bind(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
