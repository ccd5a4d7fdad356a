//! Message channel over a `SOCK_SEQPACKET` socket pair. Every packet is a
//! native endian u64 length followed by the JSON encoded message. Both ends
//! can send and receive, and each end owns its descriptor.
use std::io::{IoSlice, IoSliceMut};
use std::marker::PhantomData;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use nix::sys::socket::{self, UnixAddr};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("failed unix syscalls")]
    Nix(#[from] nix::Error),
    #[error("failed serde serialization")]
    Serde(#[from] serde_json::Error),
    #[error("channel connection broken")]
    BrokenChannel,
}

const LEN_PREFIX: usize = std::mem::size_of::<u64>();

#[derive(Debug)]
pub struct Endpoint<T> {
    fd: OwnedFd,
    phantom: PhantomData<T>,
}

impl<T> Endpoint<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn send(&self, object: &T) -> Result<(), ChannelError> {
        let payload = serde_json::to_vec(object)?;
        let len = (payload.len() as u64).to_ne_bytes();
        let iov = [IoSlice::new(&len), IoSlice::new(&payload)];
        socket::sendmsg::<UnixAddr>(
            self.fd.as_raw_fd(),
            &iov,
            &[],
            socket::MsgFlags::MSG_NOSIGNAL,
            None,
        )?;

        Ok(())
    }

    fn peek_len(&self) -> Result<usize, ChannelError> {
        let mut len = [0u8; LEN_PREFIX];
        let bytes = {
            let mut iov = [IoSliceMut::new(&mut len)];
            socket::recvmsg::<UnixAddr>(
                self.fd.as_raw_fd(),
                &mut iov,
                None,
                socket::MsgFlags::MSG_PEEK,
            )?
            .bytes
        };

        // a zero sized read is the peer closing its end
        if bytes < LEN_PREFIX {
            return Err(ChannelError::BrokenChannel);
        }
        Ok(u64::from_ne_bytes(len) as usize)
    }

    /// Blocks until the next message arrives. Returns
    /// [`ChannelError::BrokenChannel`] once the other end is closed.
    pub fn recv(&self) -> Result<T, ChannelError> {
        let msg_len = self.peek_len()?;
        let mut len = [0u8; LEN_PREFIX];
        let mut buf = vec![0u8; msg_len];
        let bytes = {
            let mut iov = [IoSliceMut::new(&mut len), IoSliceMut::new(&mut buf)];
            socket::recvmsg::<UnixAddr>(
                self.fd.as_raw_fd(),
                &mut iov,
                None,
                socket::MsgFlags::MSG_CMSG_CLOEXEC,
            )?
            .bytes
        };

        if bytes != LEN_PREFIX + msg_len {
            return Err(ChannelError::BrokenChannel);
        }
        Ok(serde_json::from_slice(&buf)?)
    }
}

impl<T> From<OwnedFd> for Endpoint<T> {
    fn from(fd: OwnedFd) -> Self {
        Self {
            fd,
            phantom: PhantomData,
        }
    }
}

impl<T> AsRawFd for Endpoint<T> {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl<T> AsFd for Endpoint<T> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// Creates a connected pair of endpoints. Both descriptors are close-on-exec.
pub fn channel<T>() -> Result<(Endpoint<T>, Endpoint<T>), ChannelError>
where
    T: Serialize + DeserializeOwned,
{
    let (first, second) = socket::socketpair(
        socket::AddressFamily::Unix,
        socket::SockType::SeqPacket,
        None,
        socket::SockFlag::SOCK_CLOEXEC,
    )?;

    Ok((Endpoint::from(first), Endpoint::from(second)))
}
