pub mod errors;
pub mod frame;
pub mod parser;

pub use errors::FrameError;
pub use frame::{
    AuthRequestPayload, AuthResponsePayload, ConfigPushPayload, DataFrame, ErrorPayload, Frame,
    FrameType, Platform, HDR_LEN,
};
pub use parser::{decode_all, decode_one, encode, DEFAULT_MAX_PAYLOAD};

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn round_trip_auth_request() {
        let frame = Frame::AuthRequest(AuthRequestPayload {
            username: "alice".into(),
            password: "hunter2".into(),
            client_version: "1.0.0".into(),
            platform: Platform::Macos,
        });
        let mut buf = BytesMut::new();
        encode(&frame, &mut buf).unwrap();

        let (decoded, consumed) = decode_one(&buf, DEFAULT_MAX_PAYLOAD).unwrap();
        assert_eq!(consumed, buf.len());
        match decoded {
            Frame::AuthRequest(p) => {
                assert_eq!(p.username, "alice");
                assert_eq!(p.platform, Platform::Macos);
            }
            _ => panic!("wrong frame variant"),
        }
    }

    #[test]
    fn round_trip_keepalive_family() {
        for frame in [Frame::KeepAlive, Frame::KeepAliveAck, Frame::Disconnect] {
            let mut buf = BytesMut::new();
            encode(&frame, &mut buf).unwrap();
            assert_eq!(buf.len(), HDR_LEN);
            let (decoded, consumed) = decode_one(&buf, DEFAULT_MAX_PAYLOAD).unwrap();
            assert_eq!(consumed, HDR_LEN);
            assert_eq!(decoded.frame_type(), frame.frame_type());
        }
    }

    #[test]
    fn decode_one_reports_need_on_short_header() {
        let buf = [0x04u8, 0x00, 0x00];
        match decode_one(&buf, DEFAULT_MAX_PAYLOAD) {
            Err(FrameError::Need(n)) => assert_eq!(n, HDR_LEN - buf.len()),
            other => panic!("expected Need, got {other:?}"),
        }
    }

    #[test]
    fn decode_one_reports_need_on_short_payload() {
        let frame = Frame::Data(DataFrame {
            payload: vec![0u8; 40],
        });
        let mut buf = BytesMut::new();
        encode(&frame, &mut buf).unwrap();
        let short = &buf[..buf.len() - 5];
        match decode_one(short, DEFAULT_MAX_PAYLOAD) {
            Err(FrameError::Need(n)) => assert_eq!(n, 5),
            other => panic!("expected Need, got {other:?}"),
        }
    }

    #[test]
    fn decode_one_rejects_unknown_type() {
        let buf = [0xAAu8, 0, 0, 0, 0];
        match decode_one(&buf, DEFAULT_MAX_PAYLOAD) {
            Err(FrameError::UnknownType(0xAA)) => {}
            other => panic!("expected UnknownType, got {other:?}"),
        }
    }

    #[test]
    fn decode_one_rejects_oversized_length() {
        let buf = [0x10u8, 0x00, 0x01, 0x00, 0x00];
        match decode_one(&buf, 1024) {
            Err(FrameError::LengthOverflow(len)) => assert_eq!(len, 0x0001_0000),
            other => panic!("expected LengthOverflow, got {other:?}"),
        }
    }

    #[test]
    fn decode_all_drains_coalesced_frames_and_keeps_residual() {
        let mut wire = BytesMut::new();
        encode(&Frame::KeepAlive, &mut wire).unwrap();
        encode(&Frame::KeepAliveAck, &mut wire).unwrap();
        wire.extend_from_slice(&[0x06, 0x00, 0x00]); // partial disconnect header

        let frames = decode_all(&mut wire, DEFAULT_MAX_PAYLOAD).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(wire.len(), 3);
    }

    #[test]
    fn decode_all_handles_split_frame_across_calls() {
        let mut full = BytesMut::new();
        encode(&Frame::KeepAlive, &mut full).unwrap();

        let mut partial = BytesMut::from(&full[..3]);
        assert!(decode_all(&mut partial, DEFAULT_MAX_PAYLOAD).unwrap().is_empty());
        assert_eq!(partial.len(), 3);

        partial.extend_from_slice(&full[3..]);
        let frames = decode_all(&mut partial, DEFAULT_MAX_PAYLOAD).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(partial.is_empty());
    }
}
