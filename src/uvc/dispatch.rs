//! Event dispatch of the UVC function.
//!
//! [`Dispatcher`] turns a decoded [`Event`] into the ordered [`Step`]s the gadget carries out
//! against the device. It also tracks the stream and disconnect state, which the gadget
//! updates once a step actually went through.

use tracing::{debug, info};

use crate::config::Transport;
use crate::control::Control;
use crate::uvc::event::Event;
use crate::uvc::format::{Endpoint, Selection};
use crate::uvc::request::{DataOutcome, RequestHandler, Response};

/// A single device operation requested by an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Answer the pending control transfer
    Respond(Response),
    /// Apply a control to the sensor
    Forward(Control),
    /// Switch the output to the committed format
    SetFormat(Selection),
    /// Allocate, prime and queue the output buffers, then start streaming
    StreamOn,
    /// Stop streaming and release the output buffers
    StreamOff,
}

/// Event state machine of the gadget
#[derive(Debug, Clone)]
pub struct Dispatcher {
    requests: RequestHandler,
    transport: Transport,
    streaming: bool,
    shutdown_requested: bool,
}

impl Dispatcher {
    pub fn new(endpoint: Endpoint) -> Self {
        Dispatcher {
            requests: RequestHandler::new(endpoint),
            transport: endpoint.transport,
            streaming: false,
            shutdown_requested: false,
        }
    }

    /// Maps an event to the steps the gadget has to perform, in order
    ///
    /// A bulk commit restarts the stream, isochronous streams follow STREAMON and STREAMOFF.
    pub fn handle(&mut self, event: &Event) -> Vec<Step> {
        match *event {
            Event::Connect(speed) => {
                info!(speed, "host connected");
                Vec::new()
            }
            Event::Disconnect => {
                info!("possible USB shutdown requested from host, seen via disconnect");
                self.shutdown_requested = true;
                Vec::new()
            }
            Event::Setup(req) => vec![Step::Respond(self.requests.setup(&req))],
            Event::Data(data) => match self.requests.data(&data) {
                DataOutcome::Done | DataOutcome::Probe(_) => Vec::new(),
                DataOutcome::Control(control) => vec![Step::Forward(control)],
                DataOutcome::Stall => vec![Step::Respond(Response::Stall)],
                DataOutcome::Commit(selection) => match self.transport {
                    // the output format cannot change while buffers are allocated
                    Transport::Bulk if self.streaming => vec![
                        Step::StreamOff,
                        Step::SetFormat(selection),
                        Step::StreamOn,
                    ],
                    Transport::Bulk => vec![Step::SetFormat(selection), Step::StreamOn],
                    Transport::Isochronous => vec![Step::SetFormat(selection)],
                },
            },
            Event::StreamOn => match self.transport {
                Transport::Isochronous => vec![Step::StreamOn],
                Transport::Bulk => {
                    debug!("bulk stream is started by the commit");
                    Vec::new()
                }
            },
            Event::StreamOff if self.streaming => vec![Step::StreamOff],
            Event::StreamOff => Vec::new(),
            Event::Other(typ) => {
                debug!(typ, "ignoring event");
                Vec::new()
            }
        }
    }

    /// Records a successful stream start, clearing a previous disconnect
    pub fn started(&mut self) {
        self.streaming = true;
        self.shutdown_requested = false;
    }

    /// Records a stream stop
    pub fn stopped(&mut self) {
        self.streaming = false;
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Whether the host signalled a disconnect since the stream was last started
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    /// Negotiation state
    pub fn requests(&self) -> &RequestHandler {
        &self.requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uvc::streaming::StreamingControl;
    use crate::uvc::sys::*;

    fn dispatcher(transport: Transport) -> Dispatcher {
        Dispatcher::new(Endpoint {
            transport,
            max_packet: 1024,
            mult: 0,
            burst: 0,
        })
    }

    fn set_cur(selector: u8, entity: u8, intf: u8, length: u16) -> Event {
        Event::Setup(usb_ctrlrequest {
            bRequestType: USB_TYPE_CLASS | USB_RECIP_INTERFACE,
            bRequest: UVC_SET_CUR,
            wValue: (selector as u16) << 8,
            wIndex: ((entity as u16) << 8) | intf as u16,
            wLength: length,
        })
    }

    fn data(bytes: &[u8]) -> Event {
        let mut data = uvc_request_data {
            length: bytes.len() as i32,
            ..Default::default()
        };
        data.data[..bytes.len()].copy_from_slice(bytes);
        Event::Data(data)
    }

    /// Runs a SET_CUR of the commit control selecting frame 2 and returns the data stage steps
    fn commit(d: &mut Dispatcher) -> Vec<Step> {
        let ack = d.handle(&set_cur(UVC_VS_COMMIT_CONTROL, 0, UVC_INTF_STREAMING, 34));
        assert_eq!(ack, vec![Step::Respond(Response::Reply(vec![0; 34]))]);

        let ctrl = StreamingControl {
            format_index: 1,
            frame_index: 2,
            frame_interval: 333_333,
            ..Default::default()
        };
        d.handle(&data(&ctrl.to_bytes()))
    }

    fn format_of(steps: &[Step]) -> (u32, u32) {
        steps
            .iter()
            .find_map(|step| match step {
                Step::SetFormat(sel) => Some((sel.width, sel.height)),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn bulk_commit_starts_the_stream() {
        let mut d = dispatcher(Transport::Bulk);
        let steps = commit(&mut d);

        assert_eq!(steps.len(), 2);
        assert_eq!(format_of(&steps), (640, 480));
        assert_eq!(steps[1], Step::StreamOn);
    }

    #[test]
    fn bulk_commit_restarts_a_running_stream() {
        let mut d = dispatcher(Transport::Bulk);
        d.started();

        let steps = commit(&mut d);
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0], Step::StreamOff);
        assert_eq!(format_of(&steps), (640, 480));
        assert_eq!(steps[2], Step::StreamOn);
    }

    #[test]
    fn isochronous_commit_only_sets_the_format() {
        let mut d = dispatcher(Transport::Isochronous);
        let steps = commit(&mut d);
        assert_eq!(steps.len(), 1);
        assert_eq!(format_of(&steps), (640, 480));
    }

    #[test]
    fn streamon_depends_on_transport() {
        assert!(dispatcher(Transport::Bulk).handle(&Event::StreamOn).is_empty());
        assert_eq!(
            dispatcher(Transport::Isochronous).handle(&Event::StreamOn),
            vec![Step::StreamOn]
        );
    }

    #[test]
    fn streamoff_when_stopped_does_nothing() {
        let mut d = dispatcher(Transport::Bulk);
        assert!(d.handle(&Event::StreamOff).is_empty());

        d.started();
        assert_eq!(d.handle(&Event::StreamOff), vec![Step::StreamOff]);
        d.stopped();
        assert!(d.handle(&Event::StreamOff).is_empty());
    }

    #[test]
    fn disconnect_is_cleared_by_the_next_stream_start() {
        let mut d = dispatcher(Transport::Bulk);
        d.started();

        assert!(d.handle(&Event::Disconnect).is_empty());
        assert!(d.shutdown_requested());

        d.stopped();
        assert!(d.shutdown_requested());
        d.started();
        assert!(!d.shutdown_requested());
    }

    #[test]
    fn rejected_data_stage_stalls() {
        let mut d = dispatcher(Transport::Bulk);
        d.handle(&set_cur(
            UVC_PU_BRIGHTNESS_CONTROL,
            UVC_ENTITY_PROCESSING_UNIT,
            UVC_INTF_CONTROL,
            2,
        ));

        let steps = d.handle(&data(&300u16.to_le_bytes()));
        assert_eq!(steps, vec![Step::Respond(Response::Stall)]);
        assert_eq!(d.requests().error_code(), UVC_ERROR_INVALID_REQUEST);
    }

    #[test]
    fn accepted_control_is_forwarded() {
        let mut d = dispatcher(Transport::Bulk);
        d.handle(&set_cur(
            UVC_PU_CONTRAST_CONTROL,
            UVC_ENTITY_PROCESSING_UNIT,
            UVC_INTF_CONTROL,
            2,
        ));

        let steps = d.handle(&data(&64u16.to_le_bytes()));
        assert_eq!(steps, vec![Step::Forward(Control::contrast(64))]);
    }

    #[test]
    fn other_events_are_ignored() {
        let mut d = dispatcher(Transport::Isochronous);
        assert!(d.handle(&Event::Connect(5)).is_empty());
        assert!(d.handle(&Event::Other(0x42)).is_empty());
        assert!(!d.is_streaming());
    }
}
