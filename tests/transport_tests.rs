//! Wire-level tests: a real rank 0 talking to a hand-driven rank 1

mod common;

use std::net::SocketAddr;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use rankmesh::protocol::{self, FrameHeader, Hello, Opcode, HEADER_LEN};
use rankmesh::{DType, Error, ProcessGroup, ReduceOp, TensorDescriptor};

use common::test_transport;

/// Start rank 0 of a two-rank group and complete the handshake as rank 1
async fn half_mesh() -> (ProcessGroup, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let spare = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let peers: Vec<SocketAddr> = vec![
        listener.local_addr().unwrap(),
        spare.local_addr().unwrap(),
    ];

    let config = test_transport();
    let join = {
        let peers = peers.clone();
        tokio::spawn(async move {
            ProcessGroup::join_with_listener(listener, 0, &peers, &config).await
        })
    };

    let mut stream = TcpStream::connect(peers[0]).await.unwrap();
    let hello = Hello::new(2);
    protocol::write_frame(&mut stream, &hello.header(1), &hello.to_payload())
        .await
        .unwrap();
    let reply = protocol::read_frame(&mut stream, Hello::LEN as u64)
        .await
        .unwrap();
    assert_eq!(reply.header.opcode, Opcode::Hello);
    assert_eq!(reply.header.sender, 0);
    Hello::from_frame(&reply).unwrap().check(0, 2).unwrap();

    let group = join.await.unwrap().unwrap();
    (group, stream)
}

#[tokio::test]
async fn test_handshake_with_raw_peer() {
    let (group, _stream) = half_mesh().await;
    assert_eq!(group.rank(), 0);
    assert_eq!(group.size(), 2);
    assert!(!group.connection_to(1).unwrap().is_closed());
}

#[tokio::test]
async fn test_receive_from_raw_peer() {
    let (group, mut stream) = half_mesh().await;

    let values: [i32; 3] = [-1, 0, 70000];
    let payload: Vec<u8> = values.iter().flat_map(|v| v.to_ne_bytes()).collect();
    let header = FrameHeader::new(Opcode::Send, 1, DType::I32, 3);
    protocol::write_frame(&mut stream, &header, &payload)
        .await
        .unwrap();

    let mut buf = [0i32; 3];
    group
        .receive(&mut TensorDescriptor::new(&mut buf), 1)
        .await
        .unwrap();
    assert_eq!(buf, values);
}

#[tokio::test]
async fn test_send_reaches_raw_peer() {
    let (group, mut stream) = half_mesh().await;

    let mut values = vec![1.5f64, -2.25];
    group
        .send(&TensorDescriptor::new(&mut values), 1)
        .await
        .unwrap();

    let frame = protocol::read_frame(&mut stream, 1024).await.unwrap();
    assert_eq!(frame.header.opcode, Opcode::Send);
    assert_eq!(frame.header.sender, 0);
    assert_eq!(frame.header.dtype, DType::F64);
    assert_eq!(frame.header.count, 2);
    assert_eq!(&frame.payload[..8], &1.5f64.to_ne_bytes());
}

#[tokio::test]
async fn test_wrong_sender_is_malformed() {
    let (group, mut stream) = half_mesh().await;

    let header = FrameHeader::new(Opcode::Send, 5, DType::U8, 2);
    protocol::write_frame(&mut stream, &header, &[1, 2])
        .await
        .unwrap();

    let mut buf = [0u8; 2];
    let err = group
        .receive(&mut TensorDescriptor::new(&mut buf), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MalformedFrame { .. }));
    assert_eq!(buf, [0, 0]);
}

#[tokio::test]
async fn test_unknown_dtype_tag_is_malformed() {
    let (group, mut stream) = half_mesh().await;

    let mut raw = FrameHeader::new(Opcode::Send, 1, DType::U8, 1).to_bytes();
    raw[5] = 42;
    stream.write_all(&raw).await.unwrap();
    stream.write_all(&[0]).await.unwrap();

    let mut buf = [0u8; 1];
    let err = group
        .receive(&mut TensorDescriptor::new(&mut buf), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MalformedFrame { .. }));
}

#[tokio::test]
async fn test_truncated_frame_is_connection_lost() {
    let (group, mut stream) = half_mesh().await;

    let header = FrameHeader::new(Opcode::Send, 1, DType::I64, 4);
    stream.write_all(&header.to_bytes()).await.unwrap();
    stream.write_all(&[0u8; 10]).await.unwrap();
    drop(stream);

    let mut buf = [0i64; 4];
    let err = group
        .receive(&mut TensorDescriptor::new(&mut buf), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConnectionLost { peer: 1, .. }));
}

#[tokio::test]
async fn test_reduce_root_folds_raw_contribution() {
    let (group, mut stream) = half_mesh().await;

    let header = FrameHeader::new(Opcode::Reduce, 1, DType::I32, 2);
    let payload: Vec<u8> = [10i32, 20].iter().flat_map(|v| v.to_ne_bytes()).collect();
    protocol::write_frame(&mut stream, &header, &payload)
        .await
        .unwrap();

    let mut buf = [1i32, 2];
    group
        .reduce(&mut TensorDescriptor::new(&mut buf), 0, ReduceOp::Sum)
        .await
        .unwrap();
    assert_eq!(buf, [11, 22]);
}

#[test]
fn test_header_layout_is_fourteen_bytes() {
    let header = FrameHeader::new(Opcode::AllReduce, 0x0102_0304, DType::F32, 9);
    let bytes = header.to_bytes();
    assert_eq!(bytes.len(), HEADER_LEN);
    assert_eq!(bytes[0], Opcode::AllReduce as u8);
    assert_eq!(&bytes[1..5], &[1, 2, 3, 4]);
    assert_eq!(&bytes[6..14], &9u64.to_be_bytes());
}
