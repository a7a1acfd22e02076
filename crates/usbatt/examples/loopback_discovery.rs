use crossbeam::channel::{unbounded, Receiver};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use usbatt::att::{AttErrorCode, AttPacket, ErrorResponse, ATT_READ_BY_GROUP_TYPE_REQ};
use usbatt::usb::MockHost;
use usbatt::{
    AttRequest, AttResponse, ConnectorConfig, GroupType, HandleValue, Request, RequestError,
    UsbConnector, UsbFrame,
};

/// (start handle, end handle, service UUID)
const SERVICES: [(u16, u16, u16); 2] = [(0x0001, 0x0005, 0x1800), (0x0006, 0x0009, 0x180F)];
const BATTERY_LEVEL_HANDLE: u16 = 0x0008;
const BATTERY_CCCD_HANDLE: u16 = 0x0009;

/// In-memory ATT server standing in for the dongle
fn serve(frame: &UsbFrame) -> Vec<Vec<u8>> {
    let request = match AttRequest::decode(frame.pdu()) {
        Ok(request) => request,
        // Commands get no answer
        Err(_) => return Vec::new(),
    };

    match request {
        AttRequest::ExchangeMtu { .. } => {
            vec![AttResponse::ExchangeMtu { server_mtu: 185 }.encode()]
        }
        AttRequest::ReadByGroupType { start_handle, .. } => {
            let mut pdu = vec![0x11, 6];
            for (start, end, uuid) in SERVICES.iter().filter(|s| s.0 >= start_handle) {
                pdu.extend_from_slice(&start.to_le_bytes());
                pdu.extend_from_slice(&end.to_le_bytes());
                pdu.extend_from_slice(&uuid.to_le_bytes());
            }
            if pdu.len() == 2 {
                return vec![ErrorResponse::new(
                    ATT_READ_BY_GROUP_TYPE_REQ,
                    start_handle,
                    AttErrorCode::AttributeNotFound,
                )
                .encode()];
            }
            vec![pdu]
        }
        AttRequest::Read { handle } if handle == BATTERY_LEVEL_HANDLE => {
            vec![AttResponse::Read { value: vec![90] }.encode()]
        }
        AttRequest::Read { .. } => vec![AttResponse::Read { value: Vec::new() }.encode()],
        AttRequest::Write { handle, value } => {
            let mut replies = vec![AttResponse::Write.encode()];
            if handle == BATTERY_CCCD_HANDLE && value == [0x01, 0x00] {
                replies.push(HandleValue::new(BATTERY_LEVEL_HANDLE, vec![89]).to_notification());
            }
            replies
        }
    }
}

fn outcome_channel() -> (
    impl FnOnce(Result<AttResponse, RequestError>) + Send + 'static,
    Receiver<Result<AttResponse, RequestError>>,
) {
    let (tx, rx) = unbounded();
    (
        move |outcome: Result<AttResponse, RequestError>| {
            let _ = tx.send(outcome);
        },
        rx,
    )
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let host = MockHost::with_device(MockHost::dongle("/dev/bus/usb/001/004"));
    host.link().set_responder(serve);

    let config = ConnectorConfig::default().with_transaction_timeout(Duration::from_secs(2));
    let connector = UsbConnector::new(host, config)?;

    println!("Searching for device...");
    let device = connector.search(None, None)?;
    println!("Found {}", device);

    if !connector.authorize()? {
        return Err("permission pending".into());
    }
    connector.configure()?;
    connector.connect()?;
    println!("Connected");

    connector.add_notification_callback(|value| {
        println!("Notification on 0x{:04X}: {}", value.handle, hex::encode(&value.value));
    });

    let (on_complete, rx) = outcome_channel();
    connector.exchange_mtu(on_complete)?;
    rx.recv_timeout(Duration::from_secs(3))??;
    println!("MTU is now {}", connector.mtu());

    // Primary service discovery
    let mut start_handle = 0x0001;
    loop {
        let (on_complete, rx) = outcome_channel();
        let request = Request::new(AttRequest::ReadByGroupType {
            start_handle,
            end_handle: 0xFFFF,
            group_type: GroupType::PRIMARY_SERVICE,
        })
        .on_complete(on_complete);
        connector.send_read(request)?;

        let response = match rx.recv_timeout(Duration::from_secs(3))? {
            Ok(AttResponse::ReadByGroupType(response)) => response,
            Err(err) if err.error_code() == Some(AttErrorCode::AttributeNotFound) => break,
            Err(err) => return Err(err.into()),
            Ok(other) => return Err(format!("unexpected response {:?}", other).into()),
        };

        let entries = response.entries()?;
        for entry in &entries {
            println!(
                "Service 0x{:04X}..0x{:04X}: {}",
                entry.handle,
                entry.end_group_handle,
                GroupType::from_bytes(&entry.value)?
            );
        }
        match entries.last() {
            Some(last) if last.end_group_handle < 0xFFFF => {
                start_handle = last.end_group_handle + 1;
            }
            _ => break,
        }
    }

    let (on_complete, rx) = outcome_channel();
    connector.send_read(Request::read(BATTERY_LEVEL_HANDLE).on_complete(on_complete))?;
    if let AttResponse::Read { value } = rx.recv_timeout(Duration::from_secs(3))?? {
        println!("Battery level: {}%", value.first().copied().unwrap_or_default());
    }

    // Enable notifications
    let (on_complete, rx) = outcome_channel();
    let request = Request::write(BATTERY_CCCD_HANDLE, vec![0x01, 0x00]).on_complete(on_complete);
    connector.send_write(request)?;
    rx.recv_timeout(Duration::from_secs(3))??;

    std::thread::sleep(Duration::from_millis(200));
    connector.disconnect();
    println!("Disconnected");
    Ok(())
}
