//! Test doubles shared by the integration tests: an in-memory CAN segment
//! connecting two stack instances, with every emitted frame recorded.
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use korri_isobus::protocol::transport::can_frame::CanFrame;
use korri_isobus::protocol::transport::traits::can_driver::CanDriver;

#[derive(Default)]
struct Segment {
    to_first: VecDeque<CanFrame>,
    to_second: VecDeque<CanFrame>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
    First,
    Second,
}

/// One endpoint of the in-memory CAN segment. Frames sent here are recorded
/// and delivered to the opposite endpoint's receive queue.
pub struct SegmentDriver {
    segment: Rc<RefCell<Segment>>,
    side: Side,
    /// Every frame this endpoint put on the wire, in order.
    pub sent: Vec<CanFrame>,
}

impl SegmentDriver {
    /// Construct a pair of interconnected endpoints.
    pub fn create_pair() -> (Self, Self) {
        let segment = Rc::new(RefCell::new(Segment::default()));
        (
            Self { segment: segment.clone(), side: Side::First, sent: Vec::new() },
            Self { segment, side: Side::Second, sent: Vec::new() },
        )
    }

    /// Frames of one PGN this endpoint emitted.
    pub fn sent_with_pgn(&self, pgn: u32) -> Vec<&CanFrame> {
        self.sent.iter().filter(|frame| frame.id.pgn() == pgn).collect()
    }
}

impl CanDriver for SegmentDriver {
    fn start(&mut self) -> bool {
        true
    }

    fn stop(&mut self) {}

    fn send(&mut self, frame: &CanFrame) -> bool {
        self.sent.push(frame.clone());
        let mut segment = self.segment.borrow_mut();
        match self.side {
            Side::First => segment.to_second.push_back(frame.clone()),
            Side::Second => segment.to_first.push_back(frame.clone()),
        }
        true
    }

    fn receive(&mut self) -> Option<CanFrame> {
        let mut segment = self.segment.borrow_mut();
        match self.side {
            Side::First => segment.to_first.pop_front(),
            Side::Second => segment.to_second.pop_front(),
        }
    }
}
