pub mod errors;
pub mod header;
pub mod message;

pub use errors::WireError;
pub use header::{
    recv_control, recv_header, send_control, send_raw, FrameHeader, SequenceCounter, HEADER_SIZE,
    MAX_CONTROL_PAYLOAD,
};
pub use message::{
    decode_pin_verify, encode_pin_verify, join_timestamp, split_timestamp, AudioHeader,
    ClientHelloBody, ConfigBody, DirtyRectHeader, DiscoveryResponseBody, FrameBodyHeader,
    HelloBody, MessageType, CLIENT_HELLO_FLAG_ENCRYPT, DIRTY_RECT_HEADER_SIZE, FRAME_HEADER_SIZE,
    PIN_UNSPECIFIED, PROTOCOL_VERSION,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Scenario 1 of `spec.md` §8: round trip of an empty PING.
    #[tokio::test]
    async fn ping_round_trip_matches_concrete_wire_bytes() {
        let mut buf = Vec::new();
        let mut seq = SequenceCounter::new();
        send_control(&mut buf, &mut seq, MessageType::Ping, &[]).await.unwrap();
        assert_eq!(buf, vec![0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);

        let mut cursor = Cursor::new(buf);
        let (header, payload) = recv_control(&mut cursor).await.unwrap();
        assert_eq!(header.msg_type, 0x06);
        assert_eq!(header.length, 0);
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn framing_round_trip_law_holds_for_any_payload() {
        for payload in [&b""[..], b"hi", &vec![0xABu8; 65_535][..]] {
            let mut buf = Vec::new();
            let mut seq = SequenceCounter::new();
            send_control(&mut buf, &mut seq, MessageType::Config, payload).await.unwrap();

            let mut cursor = Cursor::new(buf);
            let (header, decoded) = recv_control(&mut cursor).await.unwrap();
            assert_eq!(header.msg_type, u8::from(MessageType::Config));
            assert_eq!(decoded, payload);
        }
    }

    #[tokio::test]
    async fn recv_signals_clean_close_on_immediate_eof() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let err = recv_header(&mut cursor).await.unwrap_err();
        assert!(matches!(err, WireError::CleanClose));
    }

    #[tokio::test]
    async fn recv_signals_protocol_error_on_eof_mid_header() {
        let mut cursor = Cursor::new(vec![0x06, 0x00, 0x00]);
        let err = recv_header(&mut cursor).await.unwrap_err();
        assert!(matches!(err, WireError::UnexpectedEof));
    }

    #[tokio::test]
    async fn oversized_control_payload_is_rejected() {
        let mut buf = Vec::new();
        let mut seq = SequenceCounter::new();
        let big = vec![0u8; MAX_CONTROL_PAYLOAD as usize + 1];
        let err = send_control(&mut buf, &mut seq, MessageType::Config, &big).await.unwrap_err();
        assert!(matches!(err, WireError::PayloadTooLarge { .. }));
    }

    #[test]
    fn empty_payload_messages_are_nine_bytes_on_wire() {
        for mt in [MessageType::Ping, MessageType::Pong, MessageType::Pause, MessageType::Resume] {
            let header = FrameHeader { msg_type: mt.into(), length: 0, sequence: 0 };
            assert_eq!(header.encode().len(), HEADER_SIZE);
        }
    }
}
