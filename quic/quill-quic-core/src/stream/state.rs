// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::state::{event, is};

//= https://www.rfc-editor.org/rfc/rfc9000#section-3.1
//#        o
//#       | Create Stream (Sending)
//#       | Peer Creates Bidirectional Stream
//#       v
//#   +-------+
//#   | Ready | Send RESET_STREAM
//#   |       |-----------------------.
//#   +-------+                       |
//#       |                           |
//#       | Send STREAM /             |
//#       |      STREAM_DATA_BLOCKED  |
//#       v                           |
//#   +-------+                       |
//#   | Send  | Send RESET_STREAM     |
//#   |       |---------------------->|
//#   +-------+                       |
//#       |                           |
//#       | Send STREAM + FIN         |
//#       v                           v
//#   +-------+                   +-------+
//#   | Data  | Send RESET_STREAM | Reset |
//#   | Sent  |------------------>| Sent  |
//#   +-------+                   +-------+
//#       |                           |
//#       | Recv All ACKs             | Recv ACK
//#       v                           v
//#   +-------+                   +-------+
//#   | Data  |                   | Reset |
//#   | Recvd |                   | Recvd |
//#   +-------+                   +-------+

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Sender {
    #[default]
    Ready,
    Send,
    DataSent,
    DataRecvd,
    /// A local reset (or a peer STOP_SENDING) has been requested but the
    /// RESET_STREAM frame has not gone out yet
    ResetQueued,
    ResetSent,
    ResetRecvd,
}

impl Sender {
    is!(is_ready, Ready);
    is!(is_sending, Send);
    is!(is_data_sent, DataSent);
    is!(is_reset_queued, ResetQueued);
    is!(is_reset_sent, ResetSent);
    is!(
        /// True once no further frame may be emitted for this stream
        is_terminal,
        DataRecvd | ResetRecvd
    );
    is!(
        /// STREAM frames may be emitted in these states
        can_send,
        Ready | Send
    );
    is!(
        /// Lost STREAM fragments may still be retransmitted in these states
        can_retransmit,
        Send | DataSent
    );

    event! {
        on_send_stream(Ready => Send);
        // Ready can move straight to DataSent when the first frame carries
        // the FIN
        on_send_fin(Ready | Send => DataSent);
        on_recv_all_acks(DataSent => DataRecvd);

        on_queue_reset(Ready | Send | DataSent => ResetQueued);
        on_send_reset(Ready | Send | DataSent | ResetQueued => ResetSent);
        on_recv_reset_ack(ResetSent => ResetRecvd);
    }
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-3.2
//#        o
//#       | Recv STREAM / STREAM_DATA_BLOCKED / RESET_STREAM
//#       | Create Bidirectional Stream (Sending)
//#       v
//#   +-------+
//#   | Recv  | Recv RESET_STREAM
//#   |       |-----------------------.
//#   +-------+                       |
//#       |                           |
//#       | Recv STREAM + FIN         |
//#       v                           |
//#   +-------+                       |
//#   | Size  | Recv RESET_STREAM     |
//#   | Known |---------------------->|
//#   +-------+                       |
//#       |                           |
//#       | Recv All Data             |
//#       v                           v
//#   +-------+                   +-------+
//#   | Data  |                   | Reset |
//#   | Recvd |                   | Recvd |
//#   +-------+                   +-------+
//#       |                           |
//#       | App Read All Data         | App Read Reset
//#       v                           v
//#   +-------+                   +-------+
//#   | Data  |                   | Reset |
//#   | Read  |                   | Read  |
//#   +-------+                   +-------+

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Receiver {
    /// No STREAM frame has arrived yet; the receive callback may still be
    /// installed
    #[default]
    PreRecv,
    Recv,
    SizeKnown,
    DataRecvd,
    DataRead,
    ResetRecvd,
    ResetRead,
}

impl Receiver {
    is!(is_pre_recv, PreRecv);
    is!(is_receiving, Recv);
    is!(is_size_known, SizeKnown);
    is!(is_data_received, DataRecvd);
    is!(is_reset_received, ResetRecvd);
    is!(is_terminal, DataRead | ResetRead);
    is!(
        /// STREAM frames are still consumed in these states
        can_recv,
        PreRecv | Recv | SizeKnown
    );
    is!(
        /// STOP_SENDING may still be emitted in these states
        can_stop_sending,
        PreRecv | Recv | SizeKnown
    );

    event! {
        on_receive_stream(PreRecv => Recv);
        on_receive_fin(PreRecv | Recv => SizeKnown);
        on_receive_all_data(SizeKnown => DataRecvd);
        on_app_read_all_data(DataRecvd => DataRead);

        on_reset(PreRecv | Recv | SizeKnown => ResetRecvd);
        on_app_read_reset(ResetRecvd => ResetRead);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_happy_path() {
        let mut state = Sender::default();
        state.on_send_stream().unwrap();
        assert!(state.is_sending());
        state.on_send_fin().unwrap();
        assert!(state.is_data_sent());
        state.on_recv_all_acks().unwrap();
        assert!(state.is_terminal());
        // terminal states are absorbing
        assert!(state.on_send_stream().is_err());
        assert!(state.on_queue_reset().is_err());
    }

    #[test]
    fn sender_reset_path() {
        let mut state = Sender::Send;
        state.on_queue_reset().unwrap();
        assert!(state.is_reset_queued());
        state.on_send_reset().unwrap();
        assert!(state.is_reset_sent());
        state.on_recv_reset_ack().unwrap();
        assert!(state.is_terminal());
        assert!(state.on_send_reset().is_err());
    }

    #[test]
    fn sender_fin_from_ready() {
        let mut state = Sender::Ready;
        state.on_send_fin().unwrap();
        assert!(state.is_data_sent());
    }

    #[test]
    fn receiver_happy_path() {
        let mut state = Receiver::default();
        state.on_receive_stream().unwrap();
        state.on_receive_fin().unwrap();
        assert!(state.is_size_known());
        state.on_receive_all_data().unwrap();
        state.on_app_read_all_data().unwrap();
        assert!(state.is_terminal());
        assert!(state.on_reset().is_err());
    }

    #[test]
    fn receiver_reset_path() {
        let mut state = Receiver::Recv;
        state.on_reset().unwrap();
        assert!(state.is_reset_received());
        state.on_app_read_reset().unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn repeated_events_are_noops() {
        let mut state = Sender::Send;
        state.on_send_stream().unwrap_err();
        assert_eq!(
            state.on_send_stream(),
            Err(crate::state::Error::NoOp {
                current: Sender::Send
            })
        );
    }
}
