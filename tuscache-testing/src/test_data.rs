//! Generate upload payloads for tests
use bytes::Bytes;
use rand::prelude::*;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// `size` bytes of random data, reproducible from `seed`
pub fn random_data(seed: u64, size: usize) -> Bytes {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; size];
    rng.fill_bytes(&mut data);

    data.into()
}

/// Split `data` into chunks of `chunk_size` bytes; the last one may be shorter
pub fn chunks(data: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    assert!(chunk_size > 0);

    (0..data.len())
        .step_by(chunk_size)
        .map(|start| data.slice(start..(start + chunk_size).min(data.len())))
        .collect()
}

/// Split `data` into chunks of random sizes between 1 and `max_chunk_size` bytes
pub fn random_chunks(seed: u64, data: &Bytes, max_chunk_size: usize) -> Vec<Bytes> {
    assert!(max_chunk_size > 0);

    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < data.len() {
        let len = rng.gen_range(1..=max_chunk_size).min(data.len() - start);
        chunks.push(data.slice(start..start + len));
        start += len;
    }

    chunks
}

/// A request body which yields some data and then fails, like a client whose connection drops
/// partway through a request
pub struct FailingBody {
    data: Bytes,
}

impl FailingBody {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl AsyncRead for FailingBody {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if self.data.is_empty() {
            return Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "client went away",
            )));
        }

        let len = buf.remaining().min(self.data.len());
        let chunk = self.data.split_to(len);
        buf.put_slice(&chunk);

        Poll::Ready(Ok(()))
    }
}
