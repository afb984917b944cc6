// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::packet::FrameWriter;
use parking_lot::Mutex;
use quill_codec::EncoderBuffer;
use quill_quic_core::{
    ack::Waiters,
    frame::{self, Frame},
    io::IoResult,
    stream::{state::Receiver, state::Sender, InitialLimits, Initiator, StreamId, StreamType},
    transport,
    varint::VarInt,
};
use std::sync::Arc;

fn vi(value: u64) -> VarInt {
    VarInt::new(value).unwrap()
}

fn limits(value: u64) -> InitialLimits {
    InitialLimits {
        connection_data_limit: vi(value),
        uni_stream_data_limit: vi(value),
        bidi_stream_data_local_limit: vi(value),
        bidi_stream_data_remote_limit: vi(value),
        uni_stream_limit: vi(4),
        bidi_stream_limit: vi(4),
    }
}

fn flow(limit: u64) -> Arc<FlowController> {
    Arc::new(FlowController::new(vi(limit), vi(limit)))
}

/// Runs `f` against a fresh packet of `capacity` bytes, returning the
/// result, the encoded frames and the registered waiters
fn transmit<R>(
    capacity: usize,
    f: impl FnOnce(&mut FrameWriter, &mut Waiters) -> R,
) -> (R, Vec<u8>, Waiters) {
    let mut storage = vec![0u8; capacity];
    let mut encoder = EncoderBuffer::new(&mut storage);
    let mut waiters = Waiters::new();
    let result = {
        let mut writer = FrameWriter::new(&mut encoder);
        f(&mut writer, &mut waiters)
    };
    let bytes = encoder.as_slice().to_vec();
    (result, bytes, waiters)
}

fn decode_frames(mut bytes: &[u8]) -> Vec<Frame<'_>> {
    let mut frames = Vec::new();
    while !bytes.is_empty() {
        let buffer = quill_codec::DecoderBuffer::new(bytes);
        let (frame, remaining) = buffer.decode::<Frame>().unwrap();
        frames.push(frame);
        bytes = remaining.into_less_safe_slice();
    }
    frames
}

#[test]
fn send_against_flow_control() {
    let conn = flow(1000);
    let stream = SendStream::new(StreamId::from(vi(1)), &conn, vi(1000));
    stream.write(&[0u8; 63], false);

    // a 63-byte writer carries 61 payload bytes behind a 2-byte header
    let (result, bytes, waiters) = transmit(63, |w, v| stream.on_transmit(w, v));
    assert_eq!(result, IoResult::Ok);
    assert_eq!(bytes.len(), 63);
    assert_eq!(waiters.len(), 1);
    match &decode_frames(&bytes)[0] {
        Frame::Stream(frame) => {
            assert_eq!(frame.offset, VarInt::ZERO);
            assert_eq!(frame.data.len(), 61);
        }
        other => panic!("unexpected frame {other:?}"),
    }

    // the remaining 2 source bytes go out at offset 61
    let (result, bytes, _) = transmit(63, |w, v| stream.on_transmit(w, v));
    assert_eq!(result, IoResult::Ok);
    match &decode_frames(&bytes)[0] {
        Frame::Stream(frame) => {
            assert_eq!(frame.offset, vi(61));
            assert_eq!(frame.data.len(), 2);
        }
        other => panic!("unexpected frame {other:?}"),
    }
    assert_eq!(stream.written_offset(), 63);
    assert_eq!(conn.send_window().0, vi(63));
}

#[test]
fn blocked_by_stream_limit_emits_stream_data_blocked() {
    let conn = flow(10_000);
    let stream = SendStream::new(StreamId::from(vi(1)), &conn, vi(10));
    stream.write(&[0u8; 100], false);

    // hold the records so the first fragment stays in flight
    let (result, _, _in_flight) = transmit(1200, |w, v| stream.on_transmit(w, v));
    assert_eq!(result, IoResult::Ok);
    assert_eq!(stream.written_offset(), 10);

    // the stream window is exhausted: a STREAM_DATA_BLOCKED goes out
    let (result, bytes, _) = transmit(1200, |w, v| stream.on_transmit(w, v));
    assert_eq!(result, IoResult::BlockByStream);
    match &decode_frames(&bytes)[0] {
        Frame::StreamDataBlocked(frame) => assert_eq!(frame.stream_data_limit, vi(10)),
        other => panic!("unexpected frame {other:?}"),
    }

    // raising the limit resumes emission
    stream.on_max_stream_data(&frame::MaxStreamData {
        stream_id: vi(1),
        maximum_stream_data: vi(100),
    });
    let (result, _, _) = transmit(1200, |w, v| stream.on_transmit(w, v));
    assert_eq!(result, IoResult::Ok);
    assert_eq!(stream.written_offset(), 100);
}

#[test]
fn blocked_by_connection_limit_emits_data_blocked() {
    let conn = flow(10);
    let stream = SendStream::new(StreamId::from(vi(1)), &conn, vi(1000));
    stream.write(&[0u8; 100], false);

    let (result, _, _in_flight) = transmit(1200, |w, v| stream.on_transmit(w, v));
    assert_eq!(result, IoResult::Ok);

    let (result, bytes, _) = transmit(1200, |w, v| stream.on_transmit(w, v));
    assert_eq!(result, IoResult::BlockByConn);
    match &decode_frames(&bytes)[0] {
        Frame::DataBlocked(frame) => assert_eq!(frame.data_limit, vi(10)),
        other => panic!("unexpected frame {other:?}"),
    }
}

#[test]
fn unacked_fragments_cover_written_range() {
    let conn = flow(10_000);
    let stream = SendStream::new(StreamId::from(vi(1)), &conn, vi(10_000));
    stream.write(&[0u8; 200], false);

    // the strong records stand in for the ack processor here
    let (_, _, first) = transmit(102, |w, v| stream.on_transmit(w, v));
    let (_, _, _second) = transmit(103, |w, v| stream.on_transmit(w, v));
    assert_eq!(
        stream.outstanding_bytes(),
        stream.written_offset(),
        "unacked fragments must cover the written range"
    );

    // acknowledge the first fragment: the prefix leaves the ledger
    first[0].on_ack();
    stream.poll_progress();
    assert_eq!(stream.outstanding_bytes(), stream.written_offset() - 100);
}

#[test]
fn lost_fragment_splits_without_duplicating_offsets() {
    let conn = flow(10_000);
    let stream = SendStream::new(StreamId::from(vi(1)), &conn, vi(10_000));
    stream.write(&[0u8; 50], false);

    let (_, _, initial) = transmit(100, |w, v| stream.on_transmit(w, v));
    assert_eq!(stream.written_offset(), 50);
    initial[0].on_lost();

    // a 30-byte packet takes a 28-byte prefix; the suffix stays queued
    let (_, bytes, waiters) = transmit(30, |w, v| stream.on_transmit(w, v));
    match &decode_frames(&bytes)[0] {
        Frame::Stream(frame) => {
            assert_eq!(frame.offset, VarInt::ZERO);
            assert_eq!(frame.data.len(), 28);
        }
        other => panic!("unexpected frame {other:?}"),
    }
    assert_eq!(waiters.len(), 1);
    assert_eq!(stream.outstanding_bytes(), 50);

    // the suffix still observes its lost record and retransmits at its
    // own offset; the fresh prefix record stays in flight
    let (_, bytes, _prefix) = transmit(30, |w, v| stream.on_transmit(w, v));
    match &decode_frames(&bytes)[0] {
        Frame::Stream(frame) => {
            assert_eq!(frame.offset, vi(28));
            assert_eq!(frame.data.len(), 22);
        }
        other => panic!("unexpected frame {other:?}"),
    }
    assert_eq!(stream.outstanding_bytes(), 50);
}

#[test]
fn fin_then_acks_reach_data_recved() {
    let conn = flow(1000);
    let stream = SendStream::new(StreamId::from(vi(1)), &conn, vi(1000));
    stream.write(b"hello", true);

    let (result, bytes, waiters) = transmit(100, |w, v| stream.on_transmit(w, v));
    assert_eq!(result, IoResult::Ok);
    match &decode_frames(&bytes)[0] {
        Frame::Stream(frame) => assert!(frame.is_fin),
        other => panic!("unexpected frame {other:?}"),
    }
    assert_eq!(stream.sender_state(), Sender::DataSent);

    waiters[0].on_ack();
    stream.poll_progress();
    assert_eq!(stream.sender_state(), Sender::DataRecvd);
    assert!(stream.is_terminal());
}

#[test]
fn stop_sending_queues_a_reset_with_the_peer_code() {
    let conn = flow(1000);
    let stream = SendStream::new(StreamId::from(vi(1)), &conn, vi(1000));
    stream.write(&[0u8; 10], false);
    let (_, _, _) = transmit(100, |w, v| stream.on_transmit(w, v));

    stream.on_stop_sending(&frame::StopSending {
        stream_id: vi(1),
        application_error_code: vi(77),
    });
    assert_eq!(stream.sender_state(), Sender::ResetQueued);

    let (result, bytes, waiters) = transmit(100, |w, v| stream.on_transmit(w, v));
    assert_eq!(result, IoResult::Ok);
    match &decode_frames(&bytes)[0] {
        Frame::ResetStream(frame) => {
            assert_eq!(frame.application_error_code, vi(77));
            assert_eq!(frame.final_size, vi(10));
        }
        other => panic!("unexpected frame {other:?}"),
    }
    assert_eq!(stream.sender_state(), Sender::ResetSent);

    // retransmit on loss, terminal on ack
    waiters[0].on_lost();
    let (_, bytes, waiters) = transmit(100, |w, v| stream.on_transmit(w, v));
    assert!(matches!(decode_frames(&bytes)[0], Frame::ResetStream(_)));
    waiters[0].on_ack();
    let (_, bytes, _) = transmit(100, |w, v| stream.on_transmit(w, v));
    assert!(bytes.is_empty());
    assert_eq!(stream.sender_state(), Sender::ResetRecvd);
}

#[test]
fn recv_delivers_fragments_and_tracks_state() {
    let conn = flow(1000);
    let stream = RecvStream::new(StreamId::from(vi(2)), &conn, vi(1000));
    let seen: Arc<Mutex<Vec<(u64, Vec<u8>, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let expected_total = 8u64;
    let delivered = Arc::new(Mutex::new(0u64));
    let counter = delivered.clone();
    assert!(stream.set_receiver(Box::new(move |fragment| {
        sink.lock()
            .push((fragment.offset, fragment.data.to_vec(), fragment.is_fin));
        let mut count = counter.lock();
        *count += fragment.data.len() as u64;
        Ok(*count == expected_total)
    })));

    stream
        .on_stream(&frame::Stream {
            stream_id: vi(2),
            offset: VarInt::ZERO,
            with_length: true,
            is_fin: false,
            data: b"hell",
        })
        .unwrap();
    assert_eq!(stream.receiver_state(), Receiver::Recv);

    stream
        .on_stream(&frame::Stream {
            stream_id: vi(2),
            offset: vi(4),
            with_length: true,
            is_fin: true,
            data: b"o wo",
        })
        .unwrap();
    assert_eq!(stream.receiver_state(), Receiver::DataRecvd);
    assert!(stream.user_read_all());
    assert!(stream.is_terminal());

    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], (0, b"hell".to_vec(), false));
    assert_eq!(seen[1], (4, b"o wo".to_vec(), true));
}

#[test]
fn recv_rejects_flow_control_overflow() {
    let conn = flow(1000);
    let stream = RecvStream::new(StreamId::from(vi(2)), &conn, vi(10));
    let error = stream
        .on_stream(&frame::Stream {
            stream_id: vi(2),
            offset: VarInt::ZERO,
            with_length: true,
            is_fin: false,
            data: &[0u8; 11],
        })
        .unwrap_err();
    assert_eq!(error.code, transport::Error::FLOW_CONTROL_ERROR);
}

#[test]
fn recv_charges_connection_flow_control() {
    let conn = flow(8);
    let stream = RecvStream::new(StreamId::from(vi(2)), &conn, vi(1000));
    let error = stream
        .on_stream(&frame::Stream {
            stream_id: vi(2),
            offset: VarInt::ZERO,
            with_length: true,
            is_fin: false,
            data: &[0u8; 9],
        })
        .unwrap_err();
    assert_eq!(error.code, transport::Error::FLOW_CONTROL_ERROR);
}

#[test]
fn bytes_beyond_final_size_are_rejected() {
    let conn = flow(1000);
    let stream = RecvStream::new(StreamId::from(vi(2)), &conn, vi(1000));
    stream
        .on_stream(&frame::Stream {
            stream_id: vi(2),
            offset: VarInt::ZERO,
            with_length: true,
            is_fin: true,
            data: &[0u8; 4],
        })
        .unwrap();
    assert_eq!(stream.receiver_state(), Receiver::SizeKnown);

    let error = stream
        .on_stream(&frame::Stream {
            stream_id: vi(2),
            offset: vi(4),
            with_length: true,
            is_fin: false,
            data: &[0u8; 1],
        })
        .unwrap_err();
    assert_eq!(error.code, transport::Error::FINAL_SIZE_ERROR);
}

#[test]
fn reset_final_size_must_be_consistent() {
    let conn = flow(1000);
    let stream = RecvStream::new(StreamId::from(vi(2)), &conn, vi(1000));
    stream
        .on_stream(&frame::Stream {
            stream_id: vi(2),
            offset: VarInt::ZERO,
            with_length: true,
            is_fin: false,
            data: &[0u8; 10],
        })
        .unwrap();

    // a reset below the observed offset is inconsistent
    let error = stream
        .on_reset(&frame::ResetStream {
            stream_id: vi(2),
            application_error_code: vi(1),
            final_size: vi(5),
        })
        .unwrap_err();
    assert_eq!(error.code, transport::Error::FINAL_SIZE_ERROR);

    // a consistent reset is adopted and charged against the connection
    stream
        .on_reset(&frame::ResetStream {
            stream_id: vi(2),
            application_error_code: vi(1),
            final_size: vi(12),
        })
        .unwrap();
    assert_eq!(stream.receiver_state(), Receiver::ResetRecvd);
    assert_eq!(stream.reset_code(), Some(vi(1)));
    assert!(stream.user_read_reset());
}

#[test]
fn max_stream_data_emission_requires_a_larger_limit() {
    let conn = flow(1000);
    let stream = RecvStream::new(StreamId::from(vi(2)), &conn, vi(100));

    assert_eq!(
        stream.update_recv_limit(|window| (window.limit(), false)),
        IoResult::Cancel
    );
    // equal limits are ignored
    stream.update_recv_limit(|window| (window.limit(), true));
    let (_, bytes, _) = transmit(100, |w, v| stream.on_transmit(w, v));
    assert!(bytes.is_empty());

    stream.update_recv_limit(|_| (vi(200), true));
    let (result, bytes, waiters) = transmit(100, |w, v| stream.on_transmit(w, v));
    assert_eq!(result, IoResult::Ok);
    match &decode_frames(&bytes)[0] {
        Frame::MaxStreamData(frame) => assert_eq!(frame.maximum_stream_data, vi(200)),
        other => panic!("unexpected frame {other:?}"),
    }
    assert_eq!(waiters.len(), 1);

    // lost updates retransmit the current limit
    waiters[0].on_lost();
    let (_, bytes, _) = transmit(100, |w, v| stream.on_transmit(w, v));
    assert!(matches!(decode_frames(&bytes)[0], Frame::MaxStreamData(_)));
}

#[test]
fn stop_sending_is_sent_once_per_state() {
    let conn = flow(1000);
    let stream = RecvStream::new(StreamId::from(vi(2)), &conn, vi(1000));
    assert!(stream.request_stop_sending(vi(9)));
    assert!(!stream.request_stop_sending(vi(10)));

    let (_, bytes, _in_flight) = transmit(100, |w, v| stream.on_transmit(w, v));
    match &decode_frames(&bytes)[0] {
        Frame::StopSending(frame) => assert_eq!(frame.application_error_code, vi(9)),
        other => panic!("unexpected frame {other:?}"),
    }

    // while the emission is in flight nothing further goes out
    let (_, bytes, _) = transmit(100, |w, v| stream.on_transmit(w, v));
    assert!(bytes.is_empty());
}

#[test]
fn registry_enforces_peer_stream_limits() {
    let conn = flow(10_000);
    let registry = Registry::new(Initiator::Client, conn, limits(1000), limits(1000));

    for _ in 0..4 {
        registry.open_bidi().unwrap();
    }
    assert_eq!(registry.open_bidi().unwrap_err(), IoResult::BlockByConn);

    let (_, bytes, _) = transmit(100, |w, v| registry.on_transmit(w, v));
    assert!(decode_frames(&bytes)
        .iter()
        .any(|frame| matches!(frame, Frame::StreamsBlocked(f) if f.stream_type == StreamType::Bidirectional)));

    // a MAX_STREAMS grant unblocks creation
    registry.on_max_streams(&frame::MaxStreams {
        stream_type: StreamType::Bidirectional,
        maximum_streams: vi(8),
    });
    assert!(registry.open_bidi().is_ok());
}

#[test]
fn registry_creates_peer_streams_and_queues_accepts() {
    let conn = flow(10_000);
    let registry = Registry::new(Initiator::Client, conn, limits(1000), limits(1000));

    // server-initiated unidirectional stream id 3
    let frame = Frame::Stream(frame::Stream {
        stream_id: vi(3),
        offset: VarInt::ZERO,
        with_length: true,
        is_fin: false,
        data: b"hi",
    });
    registry.on_frame(&frame).unwrap();
    let accepted = registry.accept_uni().unwrap();
    assert_eq!(accepted.id(), StreamId::from(vi(3)));
    assert!(registry.accept_uni().is_none());

    // stream index beyond our advertised limit is a connection error
    let frame = Frame::Stream(frame::Stream {
        stream_id: vi(3 + 4 * 10),
        offset: VarInt::ZERO,
        with_length: true,
        is_fin: false,
        data: b"hi",
    });
    let error = registry.on_frame(&frame).unwrap_err();
    assert_eq!(error.code, transport::Error::STREAM_LIMIT_ERROR);
}

#[test]
fn frames_for_unopened_local_streams_are_rejected() {
    let conn = flow(10_000);
    let registry = Registry::new(Initiator::Client, conn, limits(1000), limits(1000));

    let frame = Frame::Stream(frame::Stream {
        stream_id: vi(0),
        offset: VarInt::ZERO,
        with_length: true,
        is_fin: false,
        data: b"hi",
    });
    let error = registry.on_frame(&frame).unwrap_err();
    assert_eq!(error.code, transport::Error::STREAM_STATE_ERROR);
}
