use std::fmt;

use crate::uvc::sys::*;

/// A decoded UVC gadget event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Host connected, carries the `usb_device_speed` value
    Connect(u32),
    Disconnect,
    StreamOn,
    StreamOff,
    /// Setup stage of a control transfer addressed to the function
    Setup(usb_ctrlrequest),
    /// Data stage of a previously answered SET request
    Data(uvc_request_data),
    /// Some other V4L2 event
    Other(u32),
}

impl Event {
    /// Decodes the `u.data` payload of a `v4l2_event` of type `typ`
    pub fn parse(typ: u32, payload: &[u8; 64]) -> Self {
        match typ {
            UVC_EVENT_CONNECT => Event::Connect(u32::from_ne_bytes([
                payload[0], payload[1], payload[2], payload[3],
            ])),
            UVC_EVENT_DISCONNECT => Event::Disconnect,
            UVC_EVENT_STREAMON => Event::StreamOn,
            UVC_EVENT_STREAMOFF => Event::StreamOff,
            UVC_EVENT_SETUP => Event::Setup(usb_ctrlrequest {
                bRequestType: payload[0],
                bRequest: payload[1],
                wValue: u16::from_le_bytes([payload[2], payload[3]]),
                wIndex: u16::from_le_bytes([payload[4], payload[5]]),
                wLength: u16::from_le_bytes([payload[6], payload[7]]),
            }),
            UVC_EVENT_DATA => {
                let mut data = uvc_request_data {
                    length: i32::from_ne_bytes([payload[0], payload[1], payload[2], payload[3]]),
                    ..Default::default()
                };
                data.data.copy_from_slice(&payload[4..64]);
                Event::Data(data)
            }
            other => Event::Other(other),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Connect(speed) => write!(f, "connect (speed {})", speed),
            Event::Disconnect => write!(f, "disconnect"),
            Event::StreamOn => write!(f, "stream on"),
            Event::StreamOff => write!(f, "stream off"),
            Event::Setup(req) => {
                let req = *req;
                let (typ, request, value, index, length) = (
                    req.bRequestType,
                    req.bRequest,
                    req.wValue,
                    req.wIndex,
                    req.wLength,
                );
                write!(
                    f,
                    "setup bRequestType {:02x} bRequest {:02x} wValue {:04x} wIndex {:04x} wLength {:04x}",
                    typ, request, value, index, length
                )
            }
            Event::Data(data) => write!(f, "data ({} bytes)", data.length),
            Event::Other(typ) => write!(f, "event {:#x}", typ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_fields_are_little_endian() {
        let mut payload = [0u8; 64];
        // GET_CUR, processing unit 2, brightness selector, two bytes
        payload[..8].copy_from_slice(&[0xa1, 0x81, 0x00, 0x02, 0x00, 0x02, 0x02, 0x00]);

        match Event::parse(UVC_EVENT_SETUP, &payload) {
            Event::Setup(req) => {
                assert_eq!(req.bRequestType, 0xa1);
                assert_eq!(req.bRequest, UVC_GET_CUR);
                assert_eq!({ req.wValue }, 0x0200);
                assert_eq!({ req.wIndex }, 0x0200);
                assert_eq!({ req.wLength }, 2);
            }
            other => panic!("unexpected event {}", other),
        }
    }

    #[test]
    fn data_phase() {
        let mut payload = [0u8; 64];
        payload[..4].copy_from_slice(&2i32.to_ne_bytes());
        payload[4] = 0x2c;
        payload[5] = 0x01;

        match Event::parse(UVC_EVENT_DATA, &payload) {
            Event::Data(data) => {
                assert_eq!(data.length, 2);
                assert_eq!(&data.data[..2], &[0x2c, 0x01]);
            }
            other => panic!("unexpected event {}", other),
        }
    }

    #[test]
    fn lifecycle_events() {
        let payload = [0u8; 64];
        assert_eq!(Event::parse(UVC_EVENT_STREAMON, &payload), Event::StreamOn);
        assert_eq!(Event::parse(UVC_EVENT_STREAMOFF, &payload), Event::StreamOff);
        assert_eq!(Event::parse(UVC_EVENT_DISCONNECT, &payload), Event::Disconnect);
        assert_eq!(Event::parse(0x42, &payload), Event::Other(0x42));
    }
}
