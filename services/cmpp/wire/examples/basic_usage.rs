//! Basic usage example for the CMPP wire crate.

use bytes::BytesMut;
use cmpp_wire::{
    check_login_status, CommandId, Connect3Rsp, ConnectReq, Frame, FrameDecoder, Packet,
    PacketRegistry, Version,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== CMPP Wire Example ===\n");

    // 1. Build a login request
    println!("1. Encoding a CONNECT request...");
    let request = Packet::ConnectReq(ConnectReq::with_timestamp(
        "900001",
        "888888",
        Version::V30,
        1_015_123_456,
    ));
    let bytes = Frame::new(request.command_id(), 1, request.encode_body()?)
        .encode(Version::V30.max_frame_size())?;
    println!("   Encoded frame size: {} bytes", bytes.len());

    // 2. Feed it to a decoder in two pieces
    println!("\n2. Decoding from a split stream...");
    let mut decoder = FrameDecoder::for_version(Version::V30);
    let mut buf = BytesMut::from(&bytes[..10]);
    assert!(decoder.decode(&mut buf)?.is_none());
    println!("   Partial frame held back ({} bytes buffered)", buf.len());

    buf.extend_from_slice(&bytes[10..]);
    let registry = PacketRegistry::new(Version::V30);
    if let Some(frame) = decoder.decode(&mut buf)? {
        println!(
            "   Command {} seq {}",
            frame.command_id, frame.sequence_id
        );
        if let Packet::ConnectReq(req) = registry.decode(frame)? {
            println!("   Source address: {}", req.source_addr);
            println!("   Timestamp: {:010}", req.timestamp);
        }
    }

    // 3. Check a login response status
    println!("\n3. Checking login responses...");
    let response = Connect3Rsp {
        status: 3,
        auth_ismg: [0; 16],
        version: Version::V30 as u8,
    };
    match check_login_status(Version::V30, response.status) {
        Ok(()) => println!("   Login accepted"),
        Err(e) => println!("   Login rejected: {} (code {})", e, e.code()),
    }

    println!(
        "\n   {} pairs with {}",
        CommandId::ACTIVE_TEST,
        CommandId::ACTIVE_TEST.response()
    );

    Ok(())
}
