use rgbd_uvc::config::{GadgetConfig, SessionConfig, Transport, UsbSpeed};
use rgbd_uvc::control::{self, Control};
use rgbd_uvc::uvc::format::Endpoint;
use rgbd_uvc::uvc::sys::*;
use rgbd_uvc::uvc::{DataOutcome, Event, RequestHandler, Response, StreamingControl};
use rgbd_uvc::Sensor;

const GET: u8 = 0x80 | USB_TYPE_CLASS | USB_RECIP_INTERFACE;
const SET: u8 = USB_TYPE_CLASS | USB_RECIP_INTERFACE;

fn isoc_handler() -> RequestHandler {
    let config = GadgetConfig {
        transport: Transport::Isochronous,
        speed: UsbSpeed::High,
        mult: 2,
        ..Default::default()
    };
    RequestHandler::new(Endpoint::new(&config))
}

/// Raw SETUP event as the kernel delivers it
fn setup(typ: u8, request: u8, selector: u8, entity: u8, intf: u8, length: u16) -> Event {
    let mut payload = [0u8; 64];
    payload[0] = typ;
    payload[1] = request;
    payload[2..4].copy_from_slice(&((selector as u16) << 8).to_le_bytes());
    payload[4..6].copy_from_slice(&(((entity as u16) << 8) | intf as u16).to_le_bytes());
    payload[6..8].copy_from_slice(&length.to_le_bytes());
    Event::parse(UVC_EVENT_SETUP, &payload)
}

/// Raw DATA event carrying `bytes`
fn data(bytes: &[u8]) -> Event {
    let mut payload = [0u8; 64];
    payload[0..4].copy_from_slice(&(bytes.len() as i32).to_ne_bytes());
    payload[4..4 + bytes.len()].copy_from_slice(bytes);
    Event::parse(UVC_EVENT_DATA, &payload)
}

fn on_setup(handler: &mut RequestHandler, event: Event) -> Response {
    match event {
        Event::Setup(req) => handler.setup(&req),
        other => panic!("not a setup event: {}", other),
    }
}

fn on_data(handler: &mut RequestHandler, event: Event) -> DataOutcome {
    match event {
        Event::Data(data) => handler.data(&data),
        other => panic!("not a data event: {}", other),
    }
}

fn streaming_get(handler: &mut RequestHandler, request: u8, selector: u8) -> StreamingControl {
    match on_setup(handler, setup(GET, request, selector, 0, UVC_INTF_STREAMING, 34)) {
        Response::Reply(bytes) => {
            assert_eq!(bytes.len(), 34);
            StreamingControl::from_bytes(&bytes)
        }
        Response::Stall => panic!("streaming request {:#x} stalled", request),
    }
}

fn streaming_set(handler: &mut RequestHandler, selector: u8, ctrl: &StreamingControl) -> DataOutcome {
    let ack = on_setup(handler, setup(SET, UVC_SET_CUR, selector, 0, UVC_INTF_STREAMING, 34));
    assert_eq!(ack, Response::Reply(vec![0; 34]));
    on_data(handler, data(&ctrl.to_bytes()))
}

#[test]
fn host_negotiates_then_commits() {
    let mut h = isoc_handler();

    let def = streaming_get(&mut h, UVC_GET_DEF, UVC_VS_PROBE_CONTROL);
    assert_eq!((def.format_index, def.frame_index), (1, 1));
    assert_eq!(def.frame_interval, 333_333);
    assert_eq!(def.max_video_frame_size, 640 * 550 * 2);
    assert_eq!(def.max_payload_transfer_size, 1024 * 3);

    let max = streaming_get(&mut h, UVC_GET_MAX, UVC_VS_PROBE_CONTROL);
    assert_eq!((max.format_index, max.frame_index), (1, 4));
    assert_eq!(max.frame_interval, 50_000_000);
    assert_eq!(max.max_video_frame_size, 1280 * 720 * 2);

    // 640x360 does not offer 70 ms, the next longer interval is picked
    let mut wanted = def;
    wanted.frame_index = 3;
    wanted.frame_interval = 700_000;
    match streaming_set(&mut h, UVC_VS_PROBE_CONTROL, &wanted) {
        DataOutcome::Probe(sel) => {
            assert_eq!((sel.width, sel.height), (640, 360));
            assert_eq!(sel.interval, 10_000_000);
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let probe = streaming_get(&mut h, UVC_GET_CUR, UVC_VS_PROBE_CONTROL);
    assert_eq!(probe.frame_index, 3);
    assert_eq!(probe.frame_interval, 10_000_000);
    assert_eq!(probe.max_video_frame_size, 640 * 360 * 2);
    assert_eq!(&probe, h.probe());

    // nothing is committed until the host says so
    assert_eq!(streaming_get(&mut h, UVC_GET_CUR, UVC_VS_COMMIT_CONTROL).frame_index, 1);

    match streaming_set(&mut h, UVC_VS_COMMIT_CONTROL, &probe) {
        DataOutcome::Commit(sel) => assert_eq!((sel.width, sel.height), (640, 360)),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(streaming_get(&mut h, UVC_GET_CUR, UVC_VS_COMMIT_CONTROL), probe);
}

#[test]
fn commit_out_of_range_is_clamped() {
    let mut h = isoc_handler();
    let bogus = StreamingControl {
        format_index: 5,
        frame_index: 9,
        ..Default::default()
    };

    match streaming_set(&mut h, UVC_VS_COMMIT_CONTROL, &bogus) {
        DataOutcome::Commit(sel) => {
            assert_eq!((sel.format_index, sel.frame_index), (1, 4));
            assert_eq!((sel.width, sel.height), (1280, 720));
            assert_eq!(sel.interval, 50_000_000);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn streaming_length_and_info() {
    let mut h = isoc_handler();
    assert_eq!(
        on_setup(&mut h, setup(GET, UVC_GET_LEN, UVC_VS_PROBE_CONTROL, 0, UVC_INTF_STREAMING, 2)),
        Response::Reply(vec![0x22, 0x00])
    );
    assert_eq!(
        on_setup(&mut h, setup(GET, UVC_GET_INFO, UVC_VS_COMMIT_CONTROL, 0, UVC_INTF_STREAMING, 1)),
        Response::Reply(vec![UVC_INFO_GET_SET])
    );
}

#[test]
fn unknown_control_stalls_and_reports_why() {
    let mut h = isoc_handler();

    let resp = on_setup(&mut h, setup(GET, UVC_GET_CUR, 0x0b, 5, UVC_INTF_CONTROL, 2));
    assert!(resp.is_stall());
    assert_eq!(uvc_request_data::from(&resp).length, -libc::EL2HLT);

    let code = on_setup(
        &mut h,
        setup(
            GET,
            UVC_GET_CUR,
            UVC_VC_REQUEST_ERROR_CODE_CONTROL,
            UVC_ENTITY_INTERFACE,
            UVC_INTF_CONTROL,
            1,
        ),
    );
    assert_eq!(code, Response::Reply(vec![UVC_ERROR_INVALID_CONTROL]));
}

#[test]
fn brightness_is_validated_before_it_reaches_the_sensor() {
    let mut h = isoc_handler();
    let brightness = |h: &mut RequestHandler| {
        on_setup(
            h,
            setup(
                SET,
                UVC_SET_CUR,
                UVC_PU_BRIGHTNESS_CONTROL,
                UVC_ENTITY_PROCESSING_UNIT,
                UVC_INTF_CONTROL,
                2,
            ),
        )
    };

    assert_eq!(brightness(&mut h), Response::Reply(vec![0, 0]));
    assert_eq!(on_data(&mut h, data(&300u16.to_le_bytes())), DataOutcome::Stall);
    assert_eq!(h.error_code(), UVC_ERROR_INVALID_REQUEST);

    assert_eq!(brightness(&mut h), Response::Reply(vec![0, 0]));
    assert_eq!(
        on_data(&mut h, data(&64u16.to_le_bytes())),
        DataOutcome::Control(Control::new(control::id::BRIGHTNESS, 64))
    );
    assert_eq!(h.brightness(), 64);
}

#[test]
fn auto_exposure_is_fixed() {
    let mut h = isoc_handler();
    let ae = |request| setup(GET, request, UVC_CT_AE_MODE_CONTROL, UVC_ENTITY_CAMERA_TERMINAL, UVC_INTF_CONTROL, 1);

    assert_eq!(on_setup(&mut h, ae(UVC_GET_CUR)), Response::Reply(vec![0x02]));
    assert_eq!(on_setup(&mut h, ae(UVC_GET_INFO)), Response::Reply(vec![0x03]));
    assert!(on_setup(&mut h, ae(UVC_GET_MAX)).is_stall());
    assert_eq!(h.error_code(), UVC_ERROR_INVALID_REQUEST);
}

#[test]
fn committed_output_matches_the_rgb_capture() {
    let config = SessionConfig::default();
    config.validate().unwrap();
    let mut h = RequestHandler::new(Endpoint::new(&config.gadget));

    // a host that takes the defaults commits the first descriptor, 640x550
    let def = streaming_get(&mut h, UVC_GET_DEF, UVC_VS_PROBE_CONTROL);
    assert_eq!(def.max_video_frame_size, 640 * 550 * 2);
    let rgb_size = config.rgb.frame_size(Sensor::Rgb);

    for wanted in [def, streaming_get(&mut h, UVC_GET_MAX, UVC_VS_PROBE_CONTROL)] {
        let sel = match streaming_set(&mut h, UVC_VS_COMMIT_CONTROL, &wanted) {
            DataOutcome::Commit(sel) => sel,
            other => panic!("unexpected outcome {:?}", other),
        };
        let output = config.gadget.output_format(sel.fourcc);
        assert_eq!(output.frame_size(), rgb_size);
        assert_eq!((output.width, output.height), (640, 480));
    }
}
