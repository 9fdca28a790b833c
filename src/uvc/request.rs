//! Control request handling of the UVC function.
//!
//! Everything here is free of I/O: a SETUP stage maps to the [`Response`] sent back to the
//! host, a DATA stage maps to the [`DataOutcome`] the gadget has to act on.

use tracing::{debug, warn};

use crate::control::Control;
use crate::uvc::format::{self, Bound, Endpoint, Selection};
use crate::uvc::streaming::{StreamingControl, STREAMING_CONTROL_SIZE};
use crate::uvc::sys::*;

/// Processing unit value range
pub const PU_MIN: u16 = 0;
pub const PU_MAX: u16 = 255;
pub const PU_STEP: u16 = 1;
pub const PU_DEFAULT: u16 = 127;

/// `CT_AE_MODE_CONTROL` value for auto exposure time and auto iris
const AE_MODE_AUTO: u8 = 0x02;

const RESPONSE_CAPACITY: usize = 60;

/// Answer to the setup stage of a control transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Send these bytes (GET) or acknowledge a data stage of this many bytes (SET)
    Reply(Vec<u8>),
    /// Stall the control endpoint
    Stall,
}

impl Response {
    fn zeroed(len: usize) -> Self {
        Response::Reply(vec![0; len.min(RESPONSE_CAPACITY)])
    }

    fn value(value: u16) -> Self {
        Response::Reply(value.to_le_bytes().to_vec())
    }

    pub fn is_stall(&self) -> bool {
        *self == Response::Stall
    }
}

impl From<&Response> for uvc_request_data {
    fn from(response: &Response) -> Self {
        let mut data = uvc_request_data::default();
        match response {
            Response::Reply(bytes) => {
                let len = bytes.len().min(RESPONSE_CAPACITY);
                data.data[..len].copy_from_slice(&bytes[..len]);
                data.length = len as i32;
            }
            Response::Stall => data.length = -libc::EL2HLT,
        }
        data
    }
}

/// What a completed data stage asks the gadget to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOutcome {
    /// Nothing beyond bookkeeping
    Done,
    /// Apply a control to the sensor
    Control(Control),
    /// The probe control was renegotiated
    Probe(Selection),
    /// The host committed to a format, the output has to follow
    Commit(Selection),
    /// Reject the data stage
    Stall,
}

/// Target of a SET_CUR whose data stage is outstanding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    None,
    Probe,
    Commit,
    Brightness,
    Contrast,
    AeMode,
}

/// Request state of the function: negotiation controls, cached values and the request error
/// code reported through `VC_REQUEST_ERROR_CODE_CONTROL`
#[derive(Debug, Clone)]
pub struct RequestHandler {
    endpoint: Endpoint,
    probe: StreamingControl,
    commit: StreamingControl,
    pending: Pending,
    error_code: u8,
    brightness: u16,
    contrast: u16,
}

impl RequestHandler {
    /// Probe and commit start out as the first supported format and frame
    pub fn new(endpoint: Endpoint) -> Self {
        let initial = format::bound_control(&endpoint, Bound::First);

        RequestHandler {
            endpoint,
            probe: initial,
            commit: initial,
            pending: Pending::None,
            error_code: UVC_ERROR_NONE,
            brightness: PU_DEFAULT,
            contrast: PU_DEFAULT,
        }
    }

    pub fn probe(&self) -> &StreamingControl {
        &self.probe
    }

    pub fn commit(&self) -> &StreamingControl {
        &self.commit
    }

    /// Last recorded request error code
    pub fn error_code(&self) -> u8 {
        self.error_code
    }

    pub fn brightness(&self) -> u16 {
        self.brightness
    }

    pub fn contrast(&self) -> u16 {
        self.contrast
    }

    /// Handles the setup stage of a control transfer
    pub fn setup(&mut self, req: &usb_ctrlrequest) -> Response {
        self.pending = Pending::None;

        let req = *req;
        let (typ, request, value, index, length) = (
            req.bRequestType,
            req.bRequest,
            req.wValue,
            req.wIndex,
            req.wLength,
        );

        match typ & USB_TYPE_MASK {
            USB_TYPE_STANDARD => {
                debug!(request, "standard request");
                Response::Stall
            }
            USB_TYPE_CLASS => {
                if typ & USB_RECIP_MASK != USB_RECIP_INTERFACE {
                    return Response::Stall;
                }

                let selector = (value >> 8) as u8;
                match (index & 0xff) as u8 {
                    UVC_INTF_CONTROL => {
                        self.control(request, selector, (index >> 8) as u8, length as usize)
                    }
                    UVC_INTF_STREAMING => self.streaming(request, selector),
                    intf => {
                        debug!(intf, "request for unknown interface");
                        Response::Stall
                    }
                }
            }
            _ => Response::Stall,
        }
    }

    fn control(&mut self, request: u8, selector: u8, entity: u8, length: usize) -> Response {
        debug!(request, selector, entity, "control request");

        let response = match (entity, selector) {
            (UVC_ENTITY_INTERFACE, UVC_VC_REQUEST_ERROR_CODE_CONTROL) => {
                return Response::Reply(vec![self.error_code]);
            }
            (UVC_ENTITY_CAMERA_TERMINAL, UVC_CT_AE_MODE_CONTROL) => match request {
                UVC_SET_CUR => {
                    // auto exposure only, attempts to change it are acknowledged and ignored
                    self.pending = Pending::AeMode;
                    Some(Response::Reply(vec![0x01]))
                }
                UVC_GET_INFO => Some(Response::Reply(vec![UVC_INFO_GET_SET])),
                UVC_GET_CUR | UVC_GET_DEF | UVC_GET_RES => {
                    Some(Response::Reply(vec![AE_MODE_AUTO]))
                }
                _ => None,
            },
            (UVC_ENTITY_PROCESSING_UNIT, UVC_PU_BRIGHTNESS_CONTROL)
            | (UVC_ENTITY_PROCESSING_UNIT, UVC_PU_CONTRAST_CONTROL) => {
                let brightness = selector == UVC_PU_BRIGHTNESS_CONTROL;
                match request {
                    UVC_SET_CUR => {
                        self.pending = if brightness {
                            Pending::Brightness
                        } else {
                            Pending::Contrast
                        };
                        Some(Response::zeroed(length))
                    }
                    UVC_GET_MIN => Some(Response::value(PU_MIN)),
                    UVC_GET_MAX => Some(Response::value(PU_MAX)),
                    UVC_GET_RES => Some(Response::value(PU_STEP)),
                    UVC_GET_DEF => Some(Response::value(PU_DEFAULT)),
                    UVC_GET_CUR if brightness => Some(Response::value(self.brightness)),
                    UVC_GET_CUR => Some(Response::value(self.contrast)),
                    UVC_GET_INFO => Some(Response::Reply(vec![UVC_INFO_GET_SET])),
                    _ => None,
                }
            }
            _ => {
                self.error_code = UVC_ERROR_INVALID_CONTROL;
                warn!(entity, selector, "unsupported control");
                return Response::Stall;
            }
        };

        match response {
            Some(response) => {
                self.error_code = UVC_ERROR_NONE;
                response
            }
            None => {
                self.error_code = UVC_ERROR_INVALID_REQUEST;
                warn!(entity, selector, request, "unsupported request");
                Response::Stall
            }
        }
    }

    fn streaming(&mut self, request: u8, selector: u8) -> Response {
        debug!(request, selector, "streaming request");

        let commit = match selector {
            UVC_VS_PROBE_CONTROL => false,
            UVC_VS_COMMIT_CONTROL => true,
            _ => return Response::Stall,
        };

        match request {
            UVC_SET_CUR => {
                self.pending = if commit {
                    Pending::Commit
                } else {
                    Pending::Probe
                };
                Response::zeroed(STREAMING_CONTROL_SIZE)
            }
            UVC_GET_CUR => {
                let ctrl = if commit { &self.commit } else { &self.probe };
                Response::Reply(ctrl.to_bytes().to_vec())
            }
            UVC_GET_MIN | UVC_GET_DEF => Response::Reply(
                format::bound_control(&self.endpoint, Bound::First)
                    .to_bytes()
                    .to_vec(),
            ),
            UVC_GET_MAX => Response::Reply(
                format::bound_control(&self.endpoint, Bound::Last)
                    .to_bytes()
                    .to_vec(),
            ),
            UVC_GET_RES => Response::zeroed(STREAMING_CONTROL_SIZE),
            UVC_GET_LEN => Response::value(STREAMING_CONTROL_SIZE as u16),
            UVC_GET_INFO => Response::Reply(vec![UVC_INFO_GET_SET]),
            _ => Response::Stall,
        }
    }

    /// Handles the data stage completing the last SET_CUR
    pub fn data(&mut self, data: &uvc_request_data) -> DataOutcome {
        let len = (data.length.max(0) as usize).min(data.data.len());
        let payload = &data.data[..len];
        let pending = std::mem::replace(&mut self.pending, Pending::None);

        match pending {
            Pending::Probe | Pending::Commit => {
                let requested = StreamingControl::from_bytes(payload);
                let selection = format::negotiate(&requested);

                if pending == Pending::Commit {
                    selection.apply(&self.endpoint, &mut self.commit);
                    debug!(commit = %self.commit, "commit control set");
                    DataOutcome::Commit(selection)
                } else {
                    selection.apply(&self.endpoint, &mut self.probe);
                    debug!(probe = %self.probe, "probe control set");
                    DataOutcome::Probe(selection)
                }
            }
            Pending::Brightness | Pending::Contrast => {
                let mut raw = [0u8; 4];
                let n = payload.len().min(4);
                raw[..n].copy_from_slice(&payload[..n]);
                let value = u32::from_le_bytes(raw);

                if value > PU_MAX as u32 {
                    self.error_code = UVC_ERROR_INVALID_REQUEST;
                    warn!(value, "processing unit value out of range");
                    return DataOutcome::Stall;
                }

                self.error_code = UVC_ERROR_NONE;
                if pending == Pending::Brightness {
                    self.brightness = value as u16;
                    DataOutcome::Control(Control::brightness(value as i32))
                } else {
                    self.contrast = value as u16;
                    DataOutcome::Control(Control::contrast(value as i32))
                }
            }
            Pending::AeMode => DataOutcome::Done,
            Pending::None => {
                warn!(len, "data stage without a pending SET_CUR");
                self.error_code = UVC_ERROR_INVALID_REQUEST;
                DataOutcome::Stall
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Transport;
    use crate::control;

    fn handler() -> RequestHandler {
        RequestHandler::new(Endpoint {
            transport: Transport::Bulk,
            max_packet: 1024,
            mult: 0,
            burst: 0,
        })
    }

    fn class(request: u8, selector: u8, entity: u8, intf: u8, length: u16) -> usb_ctrlrequest {
        usb_ctrlrequest {
            bRequestType: USB_TYPE_CLASS | USB_RECIP_INTERFACE | 0x80,
            bRequest: request,
            wValue: (selector as u16) << 8,
            wIndex: ((entity as u16) << 8) | intf as u16,
            wLength: length,
        }
    }

    fn pu(request: u8, selector: u8) -> usb_ctrlrequest {
        class(request, selector, UVC_ENTITY_PROCESSING_UNIT, UVC_INTF_CONTROL, 2)
    }

    fn streaming(request: u8, selector: u8) -> usb_ctrlrequest {
        class(request, selector, 0, UVC_INTF_STREAMING, 34)
    }

    fn data(bytes: &[u8]) -> uvc_request_data {
        let mut data = uvc_request_data {
            length: bytes.len() as i32,
            ..Default::default()
        };
        data.data[..bytes.len()].copy_from_slice(bytes);
        data
    }

    #[test]
    fn brightness_range_and_defaults() {
        let mut h = handler();
        assert_eq!(h.setup(&pu(UVC_GET_MIN, UVC_PU_BRIGHTNESS_CONTROL)), Response::Reply(vec![0, 0]));
        assert_eq!(h.setup(&pu(UVC_GET_MAX, UVC_PU_BRIGHTNESS_CONTROL)), Response::Reply(vec![255, 0]));
        assert_eq!(h.setup(&pu(UVC_GET_RES, UVC_PU_BRIGHTNESS_CONTROL)), Response::Reply(vec![1, 0]));
        assert_eq!(h.setup(&pu(UVC_GET_DEF, UVC_PU_BRIGHTNESS_CONTROL)), Response::Reply(vec![127, 0]));
        assert_eq!(h.setup(&pu(UVC_GET_CUR, UVC_PU_BRIGHTNESS_CONTROL)), Response::Reply(vec![127, 0]));
        assert_eq!(h.setup(&pu(UVC_GET_INFO, UVC_PU_BRIGHTNESS_CONTROL)), Response::Reply(vec![0x03]));
    }

    #[test]
    fn brightness_set_is_forwarded() {
        let mut h = handler();
        assert_eq!(
            h.setup(&pu(UVC_SET_CUR, UVC_PU_BRIGHTNESS_CONTROL)),
            Response::Reply(vec![0, 0])
        );
        assert_eq!(
            h.data(&data(&[200, 0])),
            DataOutcome::Control(Control::new(control::id::BRIGHTNESS, 200))
        );
        assert_eq!(h.brightness(), 200);
        assert_eq!(h.setup(&pu(UVC_GET_CUR, UVC_PU_BRIGHTNESS_CONTROL)), Response::Reply(vec![200, 0]));
    }

    #[test]
    fn brightness_out_of_range_is_rejected() {
        let mut h = handler();
        h.setup(&pu(UVC_SET_CUR, UVC_PU_BRIGHTNESS_CONTROL));

        // 300 does not fit the 8-bit range
        assert_eq!(h.data(&data(&[0x2c, 0x01])), DataOutcome::Stall);
        assert_eq!(h.brightness(), PU_DEFAULT);
        assert_eq!(h.error_code(), UVC_ERROR_INVALID_REQUEST);
    }

    #[test]
    fn contrast_has_its_own_value() {
        let mut h = handler();
        h.setup(&pu(UVC_SET_CUR, UVC_PU_CONTRAST_CONTROL));
        assert_eq!(
            h.data(&data(&[10, 0])),
            DataOutcome::Control(Control::contrast(10))
        );

        assert_eq!(h.contrast(), 10);
        assert_eq!(h.brightness(), PU_DEFAULT);
        assert_eq!(h.setup(&pu(UVC_GET_CUR, UVC_PU_CONTRAST_CONTROL)), Response::Reply(vec![10, 0]));
    }

    #[test]
    fn unsupported_control_records_error_code() {
        let mut h = handler();
        // hue
        assert!(h.setup(&pu(UVC_GET_CUR, 0x06)).is_stall());
        assert_eq!(h.error_code(), UVC_ERROR_INVALID_CONTROL);

        let error_code = class(
            UVC_GET_CUR,
            UVC_VC_REQUEST_ERROR_CODE_CONTROL,
            UVC_ENTITY_INTERFACE,
            UVC_INTF_CONTROL,
            1,
        );
        assert_eq!(h.setup(&error_code), Response::Reply(vec![0x06]));

        // unsupported request on a supported control
        assert!(h.setup(&pu(UVC_GET_LEN, UVC_PU_BRIGHTNESS_CONTROL)).is_stall());
        assert_eq!(h.setup(&error_code), Response::Reply(vec![0x07]));

        h.setup(&pu(UVC_GET_CUR, UVC_PU_BRIGHTNESS_CONTROL));
        assert_eq!(h.setup(&error_code), Response::Reply(vec![0x00]));
    }

    #[test]
    fn unknown_entity_stalls() {
        let mut h = handler();
        let req = class(UVC_GET_CUR, 0x01, 7, UVC_INTF_CONTROL, 1);
        assert!(h.setup(&req).is_stall());
        assert_eq!(h.error_code(), UVC_ERROR_INVALID_CONTROL);
    }

    #[test]
    fn auto_exposure_mode() {
        let mut h = handler();
        let ae = |request| {
            class(
                request,
                UVC_CT_AE_MODE_CONTROL,
                UVC_ENTITY_CAMERA_TERMINAL,
                UVC_INTF_CONTROL,
                1,
            )
        };

        assert_eq!(h.setup(&ae(UVC_GET_CUR)), Response::Reply(vec![0x02]));
        assert_eq!(h.setup(&ae(UVC_GET_DEF)), Response::Reply(vec![0x02]));
        assert_eq!(h.setup(&ae(UVC_GET_INFO)), Response::Reply(vec![0x03]));
        assert_eq!(h.setup(&ae(UVC_SET_CUR)), Response::Reply(vec![0x01]));
        // the data stage must not be mistaken for a brightness change
        assert_eq!(h.data(&data(&[0x01])), DataOutcome::Done);
        assert_eq!(h.brightness(), PU_DEFAULT);

        assert!(h.setup(&ae(UVC_GET_MIN)).is_stall());
        assert_eq!(h.error_code(), UVC_ERROR_INVALID_REQUEST);
    }

    #[test]
    fn standard_requests_stall() {
        let mut h = handler();
        let req = usb_ctrlrequest {
            bRequestType: USB_TYPE_STANDARD | USB_RECIP_INTERFACE,
            bRequest: 0x0b,
            ..Default::default()
        };
        assert!(h.setup(&req).is_stall());
    }

    #[test]
    fn probe_set_then_get_returns_negotiated_values() {
        let mut h = handler();
        assert_eq!(
            h.setup(&streaming(UVC_SET_CUR, UVC_VS_PROBE_CONTROL)),
            Response::Reply(vec![0; 34])
        );

        let requested = StreamingControl {
            format_index: 1,
            frame_index: 2,
            frame_interval: 666_666,
            ..Default::default()
        };
        match h.data(&data(&requested.to_bytes())) {
            DataOutcome::Probe(sel) => assert_eq!((sel.width, sel.height), (640, 480)),
            other => panic!("unexpected outcome {:?}", other),
        }

        let reply = match h.setup(&streaming(UVC_GET_CUR, UVC_VS_PROBE_CONTROL)) {
            Response::Reply(bytes) => StreamingControl::from_bytes(&bytes),
            Response::Stall => panic!("probe read stalled"),
        };
        assert_eq!(reply.format_index, 1);
        assert_eq!(reply.frame_index, 2);
        assert_eq!(reply.frame_interval, 666_666);
        assert_eq!(reply.max_video_frame_size, 640 * 480 * 2);
        assert_eq!(&reply, h.probe());
        // commit untouched until the host commits
        assert_eq!(h.commit().frame_index, 1);
    }

    #[test]
    fn commit_clamps_out_of_range_indices() {
        let mut h = handler();
        h.setup(&streaming(UVC_SET_CUR, UVC_VS_COMMIT_CONTROL));

        let requested = StreamingControl {
            format_index: 5,
            frame_index: 0,
            ..Default::default()
        };
        match h.data(&data(&requested.to_bytes())) {
            DataOutcome::Commit(sel) => {
                assert_eq!((sel.format_index, sel.frame_index), (1, 1));
                assert_eq!((sel.width, sel.height), (640, 550));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(h.commit().frame_index, 1);
    }

    #[test]
    fn streaming_metadata_requests() {
        let mut h = handler();
        assert_eq!(
            h.setup(&streaming(UVC_GET_LEN, UVC_VS_PROBE_CONTROL)),
            Response::Reply(vec![0x22, 0x00])
        );
        assert_eq!(
            h.setup(&streaming(UVC_GET_INFO, UVC_VS_COMMIT_CONTROL)),
            Response::Reply(vec![0x03])
        );
        assert_eq!(
            h.setup(&streaming(UVC_GET_RES, UVC_VS_PROBE_CONTROL)),
            Response::Reply(vec![0; 34])
        );

        let max = match h.setup(&streaming(UVC_GET_MAX, UVC_VS_PROBE_CONTROL)) {
            Response::Reply(bytes) => StreamingControl::from_bytes(&bytes),
            Response::Stall => panic!("GET_MAX stalled"),
        };
        assert_eq!(max.frame_index, 4);

        // still image trigger and friends are not supported
        assert!(h.setup(&streaming(UVC_GET_CUR, 0x05)).is_stall());
    }

    #[test]
    fn stray_data_stage_stalls() {
        let mut h = handler();
        assert_eq!(h.data(&data(&[1, 2])), DataOutcome::Stall);
    }

    #[test]
    fn stall_encoding() {
        let raw = uvc_request_data::from(&Response::Stall);
        assert_eq!(raw.length, -libc::EL2HLT);

        let raw = uvc_request_data::from(&Response::Reply(vec![0x22, 0x00]));
        assert_eq!(raw.length, 2);
        assert_eq!(&raw.data[..2], &[0x22, 0x00]);
    }
}
