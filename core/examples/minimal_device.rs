//! The "Minimal" demo device, driven over the in-memory loopback transport.
//!
//! Everything lives on the mandatory Core feature: a `reset` command, a
//! `division` command with a custom exception, a `button` event and three
//! properties (a computed device id, a raw unique id and the read-writable
//! LED blinking rate). A simulated host walks through the protocol and the
//! exchanged messages are printed as hex.

use bytes::Buf;
use hdc_device::constants::PACKET_TERMINATOR;
use hdc_device::data_model::mandatory::{CMD_ID_GET_PROPERTY_VALUE, CMD_ID_SET_PROPERTY_VALUE};
use hdc_device::transport::loopback::LoopbackTransport;
use hdc_device::{
    Arg, Command, CommandContext, DataType, Device, Exc, Feature, HdcDevice, LogLevel, Property,
    PropertyBacking, State, EXC_INVALID_ARGS,
};

const STATE_OFF: u8 = 0x00;
const STATE_INITIALIZING: u8 = 0x01;
const STATE_READY: u8 = 0x02;
const STATE_ERROR: u8 = 0xFF;

const SLOT_UC_UID: usize = 0;
const SLOT_LED_BLINKING_RATE: usize = 1;

struct CoreApi {
    devid: u32,
}

static CORE_API: CoreApi = CoreApi { devid: 0x1000_6431 };

static EXC_DIV_ZERO: Exc = Exc {
    id: 0x01,
    name: "MyDivZero",
    doc: None,
};

fn cmd_reset(ctx: &mut CommandContext<'_>) {
    if ctx.request().len() != 3 {
        return ctx.reply_error(&EXC_INVALID_ARGS);
    }
    // Reply before resetting, or the host would time out waiting for it.
    ctx.reply_void();
    ctx.transition_state(STATE_OFF);
    ctx.flush();
    // A real device would reset its hardware here.
    println!("(device) reset requested, rebooting");
}

fn cmd_division(ctx: &mut CommandContext<'_>) {
    let mut args = ctx.args();
    if args.len() != 8 {
        return ctx.reply_error(&EXC_INVALID_ARGS);
    }
    let numerator = args.get_f32_le();
    let denominator = args.get_f32_le();
    if denominator == 0.0 {
        return ctx.reply_error(&EXC_DIV_ZERO);
    }
    ctx.reply_f64((numerator / denominator) as f64);
}

fn devid_get(
    ctx: &hdc_device::property::PropContext<'_>,
) -> Result<hdc_device::property::PropValue, u8> {
    let api = ctx
        .feature
        .api
        .and_then(|api| api.downcast_ref::<CoreApi>())
        .expect("core feature carries its api handle");
    let mut value = hdc_device::property::PropValue::new();
    let _ = value.extend_from_slice(&api.devid.to_le_bytes());
    Ok(value)
}

static CORE_STATES: [State; 4] = [
    State {
        id: STATE_OFF,
        name: "OFF",
        doc: None,
    },
    State {
        id: STATE_INITIALIZING,
        name: "INIT",
        doc: None,
    },
    State {
        id: STATE_READY,
        name: "READY",
        doc: None,
    },
    State {
        id: STATE_ERROR,
        name: "ERROR",
        doc: None,
    },
];

static CORE_COMMANDS: [Command; 2] = [
    Command {
        id: 0x01,
        name: "reset",
        doc: Some("Reinitializes the whole device."),
        args: &[],
        returns: &[],
        raises: &[],
        handler: cmd_reset,
    },
    Command {
        id: 0x02,
        name: "division",
        doc: Some("Divides numerator by denominator."),
        args: &[
            Arg {
                dtype: DataType::Float,
                name: Some("numerator"),
                doc: None,
            },
            Arg {
                dtype: DataType::Float,
                name: Some("denominator"),
                doc: Some("Beware of the zero!"),
            },
        ],
        returns: &[Arg {
            dtype: DataType::Double,
            name: None,
            doc: Some("Quotient of numerator/denominator"),
        }],
        raises: &[&EXC_DIV_ZERO],
        handler: cmd_division,
    },
];

static CORE_EVENTS: [hdc_device::Event; 1] = [hdc_device::Event {
    id: 0x01,
    name: "button",
    doc: Some("Notify host about the button being pressed on the device."),
    args: &[
        Arg {
            dtype: DataType::Uint8,
            name: Some("button_id"),
            doc: None,
        },
        Arg {
            dtype: DataType::Uint8,
            name: Some("button_state"),
            doc: None,
        },
    ],
}];

static CORE_PROPERTIES: [Property; 3] = [
    Property {
        id: 0x10,
        name: "uc_devid",
        dtype: DataType::Uint32,
        read_only: true,
        backing: PropertyBacking::Computed {
            get: devid_get,
            set: None,
        },
        doc: Some("32bit Device-ID of the microcontroller."),
    },
    Property {
        id: 0x11,
        name: "uc_uid",
        dtype: DataType::Blob,
        read_only: true,
        backing: PropertyBacking::Storage {
            slot: SLOT_UC_UID,
            value_size: 12,
            init: &[0x30, 0x33, 0x35, 0x00, 0x31, 0x38, 0x04, 0x47, 0x30, 0x33, 0x39, 0x32],
        },
        doc: Some("96bit unique-ID of the microcontroller."),
    },
    Property {
        id: 0x12,
        name: "led_blinking_rate",
        dtype: DataType::Uint8,
        read_only: false,
        backing: PropertyBacking::Storage {
            slot: SLOT_LED_BLINKING_RATE,
            value_size: 0,
            init: &[5],
        },
        doc: Some("Blinking frequency of the LED given in Hertz."),
    },
];

static MINIMAL_DEVICE: Device = Device {
    version: hdc_device::constants::VERSION_STRING,
    features: &[Feature {
        id: 0x00,
        name: "core",
        class_name: "MinimalCore",
        class_version: "0.0.1",
        doc: Some("Minimal HDC-device demonstration"),
        states: &CORE_STATES,
        commands: &CORE_COMMANDS,
        properties: &CORE_PROPERTIES,
        events: &CORE_EVENTS,
        api: Some(&CORE_API),
        initial_state: STATE_OFF,
        initial_log_threshold: LogLevel::Info,
    }],
};

/// Wraps a message into one packet the way a host library would.
fn packetize(msg: &[u8]) -> Vec<u8> {
    let mut packet = vec![msg.len() as u8];
    packet.extend_from_slice(msg);
    let folded = packet.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    packet.push(folded.wrapping_neg());
    packet.push(PACKET_TERMINATOR);
    packet
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn exchange(device: &mut HdcDevice<LoopbackTransport>, label: &str, request: &[u8]) {
    println!("(host) {label}: {}", hex(request));
    let packet = packetize(request);
    device.transport_mut().host_sends(&packet);
    device.work();
    device.flush();
    println!("(device) -> {}", hex(&device.transport_mut().host_receive()));
}

fn main() {
    let transport = LoopbackTransport::new();
    let mut device = HdcDevice::new(transport, &MINIMAL_DEVICE).expect("valid descriptor tables");

    // Power-up sequence, as the firmware's init code would run it.
    device.set_feature_state(None, STATE_INITIALIZING);
    device.set_feature_state(None, STATE_READY);
    device.flush();
    println!(
        "(device) boot events: {}",
        hex(&device.transport_mut().host_receive())
    );

    exchange(&mut device, "echo", &[0xF1, b'p', b'i', b'n', b'g']);
    exchange(&mut device, "hdc version", &[0xF0, 0xF0]);
    exchange(&mut device, "max req", &[0xF0, 0xF1]);
    exchange(
        &mut device,
        "get uc_devid",
        &[0xF2, 0x00, CMD_ID_GET_PROPERTY_VALUE, 0x10],
    );
    exchange(
        &mut device,
        "set led_blinking_rate = 9",
        &[0xF2, 0x00, CMD_ID_SET_PROPERTY_VALUE, 0x12, 9],
    );
    println!(
        "(device) main loop sees blinking rate {} Hz",
        device.slots().u8(SLOT_LED_BLINKING_RATE)
    );

    let mut division = vec![0xF2, 0x00, 0x02];
    division.extend_from_slice(&10.0f32.to_le_bytes());
    division.extend_from_slice(&4.0f32.to_le_bytes());
    exchange(&mut device, "division 10/4", &division);

    let mut div_zero = vec![0xF2, 0x00, 0x02];
    div_zero.extend_from_slice(&1.0f32.to_le_bytes());
    div_zero.extend_from_slice(&0.0f32.to_le_bytes());
    exchange(&mut device, "division 1/0", &div_zero);

    // The device-initiated direction: a button press and a log line.
    device.emit_event(None, 0x01, &[0x42], &[0x01]);
    device.emit_log(None, LogLevel::Info, "button was pressed");
    device.flush();
    println!(
        "(device) events: {}",
        hex(&device.transport_mut().host_receive())
    );

    exchange(&mut device, "reset", &[0xF2, 0x00, 0x01]);
}
