//! UVC gadget and USB control request definitions.
//!
//! We need to carry our own copy of these, they live in linux/usb/g_uvc.h, linux/usb/video.h
//! and linux/usb/ch9.h which the videodev2 bindings do not cover.
#![allow(non_camel_case_types, non_snake_case)]

/// `V4L2_EVENT_PRIVATE_START`
pub const UVC_EVENT_FIRST: u32 = 0x0800_0000;
pub const UVC_EVENT_CONNECT: u32 = UVC_EVENT_FIRST;
pub const UVC_EVENT_DISCONNECT: u32 = UVC_EVENT_FIRST + 1;
pub const UVC_EVENT_STREAMON: u32 = UVC_EVENT_FIRST + 2;
pub const UVC_EVENT_STREAMOFF: u32 = UVC_EVENT_FIRST + 3;
pub const UVC_EVENT_SETUP: u32 = UVC_EVENT_FIRST + 4;
pub const UVC_EVENT_DATA: u32 = UVC_EVENT_FIRST + 5;

// request codes
pub const UVC_SET_CUR: u8 = 0x01;
pub const UVC_GET_CUR: u8 = 0x81;
pub const UVC_GET_MIN: u8 = 0x82;
pub const UVC_GET_MAX: u8 = 0x83;
pub const UVC_GET_RES: u8 = 0x84;
pub const UVC_GET_LEN: u8 = 0x85;
pub const UVC_GET_INFO: u8 = 0x86;
pub const UVC_GET_DEF: u8 = 0x87;

// bRequestType
pub const USB_TYPE_MASK: u8 = 0x03 << 5;
pub const USB_TYPE_STANDARD: u8 = 0x00 << 5;
pub const USB_TYPE_CLASS: u8 = 0x01 << 5;
pub const USB_RECIP_MASK: u8 = 0x1f;
pub const USB_RECIP_INTERFACE: u8 = 0x01;

// interface numbers of the function
pub const UVC_INTF_CONTROL: u8 = 0;
pub const UVC_INTF_STREAMING: u8 = 1;

// entity ids as laid out in the function's descriptors
pub const UVC_ENTITY_INTERFACE: u8 = 0;
pub const UVC_ENTITY_CAMERA_TERMINAL: u8 = 1;
pub const UVC_ENTITY_PROCESSING_UNIT: u8 = 2;

// control selectors
pub const UVC_VC_REQUEST_ERROR_CODE_CONTROL: u8 = 0x02;
pub const UVC_CT_AE_MODE_CONTROL: u8 = 0x02;
pub const UVC_PU_BRIGHTNESS_CONTROL: u8 = 0x02;
pub const UVC_PU_CONTRAST_CONTROL: u8 = 0x03;
pub const UVC_VS_PROBE_CONTROL: u8 = 0x01;
pub const UVC_VS_COMMIT_CONTROL: u8 = 0x02;

// request error codes
pub const UVC_ERROR_NONE: u8 = 0x00;
pub const UVC_ERROR_INVALID_CONTROL: u8 = 0x06;
pub const UVC_ERROR_INVALID_REQUEST: u8 = 0x07;

/// GET_INFO: supports GET and SET, no autoupdate
pub const UVC_INFO_GET_SET: u8 = 0x03;

/// Setup packet of a control transfer, little-endian on the wire
#[repr(C, packed)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct usb_ctrlrequest {
    pub bRequestType: u8,
    pub bRequest: u8,
    pub wValue: u16,
    pub wIndex: u16,
    pub wLength: u16,
}

/// Response payload handed to `UVCIOC_SEND_RESPONSE`, also the payload of a DATA event
///
/// A negative `length` stalls the control endpoint.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct uvc_request_data {
    pub length: i32,
    pub data: [u8; 60],
}

impl Default for uvc_request_data {
    fn default() -> Self {
        uvc_request_data {
            length: 0,
            data: [0; 60],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_layouts() {
        assert_eq!(std::mem::size_of::<usb_ctrlrequest>(), 8);
        assert_eq!(std::mem::size_of::<uvc_request_data>(), 64);
    }
}
