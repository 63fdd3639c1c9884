//! Bidirectional byte splicing
//!
//! Joins two stream endpoints into one transparent pipe. Each side may
//! carry a prefix of bytes that were already consumed from it (the
//! relay's parsed request bytes, the tail the rendezvous read past the
//! token line); those are replayed to the opposite side before live
//! copying starts, so both peers observe the original byte sequence
//! exactly.
//!
//! When one direction reaches EOF the opposite write half is shut down
//! so the peer can drain; the splice completes once both directions are
//! done and both endpoints close on drop.

use bytes::Bytes;
use tokio::io::{copy_bidirectional, AsyncRead, AsyncWrite, AsyncWriteExt};

/// Bytes moved in each direction, prefix replay included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpliceSummary {
    /// Bytes delivered to endpoint B (prefix of A plus live reads from A).
    pub a_to_b: u64,
    /// Bytes delivered to endpoint A (prefix of B plus live reads from B).
    pub b_to_a: u64,
}

/// Splice endpoints `a` and `b` together.
///
/// `a_buffered` holds bytes already read from `a` that still belong to
/// the stream; they are written to `b` first (and `b_buffered` to `a`).
/// Returns once both directions have finished or either fails; the
/// endpoints are dropped (closed) either way. The first I/O error is
/// returned for the caller to log. After the handoff there is nobody
/// left to answer, so closing the sockets is the only remedy.
pub async fn splice<A, B>(
    mut a: A,
    a_buffered: Bytes,
    mut b: B,
    b_buffered: Bytes,
) -> std::io::Result<SpliceSummary>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    // Replay the prefixes concurrently; a peer slow to drain one
    // direction must not hold up the other.
    tokio::try_join!(
        async {
            if a_buffered.is_empty() {
                Ok(())
            } else {
                b.write_all(&a_buffered).await
            }
        },
        async {
            if b_buffered.is_empty() {
                Ok(())
            } else {
                a.write_all(&b_buffered).await
            }
        },
    )?;

    let (live_a_to_b, live_b_to_a) = copy_bidirectional(&mut a, &mut b).await?;

    Ok(SpliceSummary {
        a_to_b: a_buffered.len() as u64 + live_a_to_b,
        b_to_a: b_buffered.len() as u64 + live_b_to_a,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_prefixes_are_replayed_before_live_bytes() {
        let (a_local, mut a_peer) = tokio::io::duplex(64);
        let (b_local, mut b_peer) = tokio::io::duplex(64);

        let handle = tokio::spawn(splice(
            a_local,
            Bytes::from_static(b"a-prefix:"),
            b_local,
            Bytes::from_static(b"b-prefix:"),
        ));

        a_peer.write_all(b"from-a").await.unwrap();
        a_peer.shutdown().await.unwrap();
        b_peer.write_all(b"from-b").await.unwrap();
        b_peer.shutdown().await.unwrap();

        let mut to_b = Vec::new();
        b_peer.read_to_end(&mut to_b).await.unwrap();
        assert_eq!(to_b, b"a-prefix:from-a");

        let mut to_a = Vec::new();
        a_peer.read_to_end(&mut to_a).await.unwrap();
        assert_eq!(to_a, b"b-prefix:from-b");

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.a_to_b, 15);
        assert_eq!(summary.b_to_a, 15);
    }

    #[tokio::test]
    async fn test_empty_prefixes() {
        let (a_local, mut a_peer) = tokio::io::duplex(64);
        let (b_local, mut b_peer) = tokio::io::duplex(64);

        let handle = tokio::spawn(splice(a_local, Bytes::new(), b_local, Bytes::new()));

        a_peer.write_all(b"ping").await.unwrap();
        a_peer.shutdown().await.unwrap();

        let mut to_b = vec![0u8; 4];
        b_peer.read_exact(&mut to_b).await.unwrap();
        assert_eq!(&to_b, b"ping");

        b_peer.write_all(b"pong").await.unwrap();
        b_peer.shutdown().await.unwrap();

        let mut to_a = Vec::new();
        a_peer.read_to_end(&mut to_a).await.unwrap();
        assert_eq!(to_a, b"pong");

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.a_to_b, 4);
        assert_eq!(summary.b_to_a, 4);
    }

    #[tokio::test]
    async fn test_no_corruption_across_prefix_boundary() {
        // Large transfer through a small pipe: the seam between the
        // replayed prefix and live reads must not drop or reorder bytes.
        let prefix: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
        let live: Vec<u8> = (0..64 * 1024u32).map(|i| (i % 241) as u8).collect();

        let (a_local, mut a_peer) = tokio::io::duplex(512);
        let (b_local, mut b_peer) = tokio::io::duplex(512);

        let handle = tokio::spawn(splice(
            a_local,
            Bytes::from(prefix.clone()),
            b_local,
            Bytes::new(),
        ));

        let live_in = live.clone();
        let writer = tokio::spawn(async move {
            a_peer.write_all(&live_in).await.unwrap();
            a_peer.shutdown().await.unwrap();
            a_peer
        });

        let mut received = Vec::new();
        b_peer.read_to_end(&mut received).await.unwrap();
        b_peer.shutdown().await.unwrap();

        let mut expected = prefix.clone();
        expected.extend_from_slice(&live);
        assert_eq!(received.len(), expected.len());
        assert_eq!(received, expected);

        let mut a_peer = writer.await.unwrap();
        let mut rest = Vec::new();
        a_peer.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.a_to_b, expected.len() as u64);
        assert_eq!(summary.b_to_a, 0);
    }

    #[tokio::test]
    async fn test_peer_close_terminates_splice() {
        let (a_local, a_peer) = tokio::io::duplex(64);
        let (b_local, mut b_peer) = tokio::io::duplex(64);

        let handle = tokio::spawn(splice(a_local, Bytes::new(), b_local, Bytes::new()));

        // Full close of one peer ends both directions.
        drop(a_peer);
        b_peer.shutdown().await.unwrap();

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.a_to_b, 0);
        assert_eq!(summary.b_to_a, 0);

        let mut rest = Vec::new();
        b_peer.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
