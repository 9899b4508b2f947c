//! USB driver
//!
//! The `Driver` is the one owner of device, endpoint and vendor state. The
//! USB interrupt handler runs [`on_interrupt`](Driver::on_interrupt); the
//! main loop only reads states, and writes through
//! [`bulk_write`](Driver::bulk_write). See [`Bus`](crate::Bus) for sharing
//! a driver between the two.
//!
//! # Control transfers
//!
//! The control endpoint's state is implied by the hardware's completion
//! flags. A SETUP is parsed, routed on its tag, and the reply (possibly
//! zero length) is staged and sent right away. For requests with an OUT
//! data stage, that zero length reply doubles as the status stage.
//! Transmit completions apply a deferred address, send the next packet of
//! a long reply, or end the transfer.

use crate::{
    buffer::{self, PacketMemory},
    descriptors::{Catalog, Descriptor, Identity, CONFIGURATION_VALUE},
    endpoint::{Endpoint, Kind},
    ral::{self, endpoint::EPR, usb},
    register::EndpointRegister,
    ring::Producer,
    setup::{tag, SetupPacket},
    vendor::{Emulator, LineSettings, UartState, VendorControl},
    Peripherals, ENDPOINT_COUNT, MAX_PACKET_SIZE,
};
use usb_device::{
    control::{Request, RequestType},
    UsbError,
};

/// Control endpoint
pub const CONTROL: usize = 0;
/// Bulk IN / OUT endpoint pair
pub const BULK: usize = 1;

/// Control OUT packets larger than this mean the peripheral is corrupt
const MAX_CONTROL_OUT: usize = 10;

const GET_STATUS_DEVICE: u16 = tag(0x80, Request::GET_STATUS);
const GET_STATUS_INTERFACE: u16 = tag(0x81, Request::GET_STATUS);
const GET_STATUS_ENDPOINT: u16 = tag(0x82, Request::GET_STATUS);
const GET_DESCRIPTOR: u16 = tag(0x80, Request::GET_DESCRIPTOR);
const GET_CONFIGURATION: u16 = tag(0x80, Request::GET_CONFIGURATION);
const SET_ADDRESS: u16 = tag(0x00, Request::SET_ADDRESS);
const SET_CONFIGURATION: u16 = tag(0x00, Request::SET_CONFIGURATION);

/// GET_STATUS device bit, matching the configuration's attributes
const SELF_POWERED: u8 = 1 << 0;

/// Device enumeration state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum DeviceState {
    /// Created, but the peripheral isn't initialized.
    Boot,
    /// The peripheral is running, and the host may be enumerating.
    Initialized,
    /// The host selected the configuration.
    Configured,
}

/// What the driver does with requests that it doesn't recognize
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum UnhandledPolicy {
    /// Reply with a zero length packet, as if the request was handled.
    #[default]
    Acknowledge,
    /// Stall the control endpoint.
    Stall,
}

/// A USB driver
///
/// After you allocate a `Driver` with [`new()`](Driver::new), you must
/// call [`initialize()`](Driver::initialize) once before enabling the
/// USB interrupt.
pub struct Driver {
    usb: ral::Instance<usb::RegisterBlock>,
    pma: ral::Instance<PacketMemory>,
    endpoints: [Option<Endpoint>; ENDPOINT_COUNT],
    state: DeviceState,
    pending_address: Option<u8>,
    catalog: Catalog,
    vendor: Emulator,
    policy: UnhandledPolicy,
    input: Producer<'static>,
}

/// The endpoints that the driver configures
///
/// # Panics
///
/// Panics if `index` isn't one of them.
fn endpoint_mut(endpoints: &mut [Option<Endpoint>], index: usize) -> &mut Endpoint {
    match endpoints.get_mut(index).and_then(Option::as_mut) {
        Some(endpoint) => endpoint,
        None => unreachable!("Endpoint {} isn't configured", index),
    }
}

impl Driver {
    /// Create a new `Driver`
    ///
    /// Creation only assigns packet memory to the endpoints. Bytes
    /// received on the bulk OUT endpoint are pushed into `input`.
    pub fn new<P: Peripherals>(peripherals: P, input: Producer<'static>) -> Self {
        let ral::Instances { usb, pma } = ral::instances(peripherals);

        let mut allocator = buffer::Allocator::new();
        let mut allocate = || match allocator.allocate(MAX_PACKET_SIZE as u16) {
            Some(offset) => offset,
            None => panic!("Packet memory exhausted"),
        };
        let mut endpoints: [Option<Endpoint>; ENDPOINT_COUNT] = Default::default();
        endpoints[CONTROL] = Some(Endpoint::new(CONTROL, Kind::Control, allocate(), allocate()));
        endpoints[BULK] = Some(Endpoint::new(BULK, Kind::Bulk, allocate(), allocate()));

        Driver {
            usb,
            pma,
            endpoints,
            state: DeviceState::Boot,
            pending_address: None,
            catalog: Catalog::new(Identity::DEFAULT),
            vendor: Emulator::new(),
            policy: UnhandledPolicy::default(),
            input,
        }
    }

    /// Replace the strings that the host shows for the device
    pub fn set_identity(&mut self, identity: Identity) {
        self.catalog.set_identity(identity);
    }

    pub fn set_unhandled_policy(&mut self, policy: UnhandledPolicy) {
        self.policy = policy;
    }

    /// Power up the peripheral, and prepare for the host's bus reset
    ///
    /// Assumes that the USB clock is running. When this returns, the
    /// transfer and reset interrupts are enabled in the peripheral. You
    /// still need to unmask the interrupt in the NVIC.
    pub fn initialize(&mut self) {
        let usb = self.usb.block();
        ral::write_reg!(ral::usb, usb, CNTR, 0);
        ral::write_reg!(ral::usb, usb, ISTR, 0);
        ral::write_reg!(ral::usb, usb, DADDR, 0);
        ral::write_reg!(ral::usb, usb, BTABLE, 0);
        self.pma.clear();

        self.reset();
        self.set_interrupts(true);
        self.state = DeviceState::Initialized;
        debug!("INITIALIZED");
    }

    /// Enable (`true`) or disable (`false`) the peripheral's transfer and reset interrupts
    pub fn set_interrupts(&mut self, interrupts: bool) {
        let enable = interrupts as u32;
        ral::modify_reg!(ral::usb, self.usb.block(), CNTR, CTRM: enable, RESETM: enable);
    }

    /// Reinitialize every endpoint, and return to the default address
    ///
    /// Any transfer in progress is dropped. A configured device drops back
    /// to initialized, since the host will enumerate it again.
    pub fn reset(&mut self) {
        let usb = self.usb.block();
        let pma = self.pma.block();
        for index in 0..ENDPOINT_COUNT {
            EndpointRegister::new(usb, index).clear();
        }
        for endpoint in self.endpoints.iter_mut().flatten() {
            endpoint.initialize(usb, pma);
        }

        self.pending_address = None;
        self.vendor.clear_control();
        if self.state == DeviceState::Configured {
            self.state = DeviceState::Initialized;
        }
        self.set_address(0);
        debug!("RESET");
    }

    fn set_address(&self, address: u8) {
        ral::write_reg!(ral::usb, self.usb.block(), DADDR, EF: 1, ADD: address as u32);
        debug!("ADDRESS {}", address);
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn uart_state(&self) -> UartState {
        self.vendor.uart()
    }

    pub fn line_settings(&self) -> LineSettings {
        *self.vendor.settings()
    }

    /// Indicates if the bulk IN endpoint has a transfer in flight
    pub fn is_transmitting(&self) -> bool {
        self.endpoints[BULK]
            .as_ref()
            .map_or(false, Endpoint::is_transmitting)
    }

    /// The control OUT data stage that the host announced, if any
    pub fn vendor_control(&self) -> VendorControl {
        self.vendor.control()
    }

    /// Indicates if the host raised DTR, and no one has taken the prompt request
    pub fn prompt_pending(&self) -> bool {
        self.vendor.prompt_pending()
    }

    /// Take the host's prompt request, if the bulk path is ready for it
    ///
    /// Returns `false`, and leaves the request alone, unless the device is
    /// configured, the UART is enabled, and the bulk IN endpoint is idle.
    pub fn take_prompt_request(&mut self) -> bool {
        self.is_ready() && !self.is_transmitting() && self.vendor.take_prompt()
    }

    fn is_ready(&self) -> bool {
        self.state == DeviceState::Configured && self.vendor.uart() == UartState::Enabled
    }

    /// Start sending `data` to the host on the bulk IN endpoint
    ///
    /// Returns the number of bytes accepted, which is constrained by the
    /// endpoint's [`TRANSMIT_CAPACITY`](crate::TRANSMIT_CAPACITY). Data longer than one
    /// packet goes out one packet per transmit completion.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the device isn't configured, or the host hasn't
    ///   enabled the UART.
    /// - `WouldBlock` if the previous transfer is still in flight.
    pub fn bulk_write(&mut self, data: &[u8]) -> usb_device::Result<usize> {
        if !self.is_ready() {
            return Err(UsbError::InvalidState);
        }
        let endpoint = endpoint_mut(&mut self.endpoints, BULK);
        if endpoint.is_transmitting() {
            return Err(UsbError::WouldBlock);
        }
        if data.is_empty() {
            return Ok(0);
        }
        let accepted = endpoint.stage(data);
        endpoint.transmit(self.usb.block(), self.pma.block());
        Ok(accepted)
    }

    /// Service the USB interrupt
    pub fn on_interrupt(&mut self) {
        use ral::usb::ISTR;

        let usb = self.usb.block();
        let istr = ral::read_reg!(ral::usb, usb, ISTR);

        if istr & ISTR::RESET::mask != 0 {
            self.reset();
            ral::write_reg!(ral::usb, usb, ISTR, !ISTR::RESET::mask);
        }

        if istr & ISTR::CTR::mask != 0 {
            let index = ((istr & ISTR::EP_ID::mask) >> ISTR::EP_ID::offset) as usize;
            if index == CONTROL {
                self.control_transfer();
            } else {
                self.data_transfer(index);
            }
        }
    }

    fn control_transfer(&mut self) {
        let epr = EndpointRegister::new(self.usb.block(), CONTROL).read();
        // A completion always belongs to a transfer that started before
        // this interrupt, so retire it before looking at new packets.
        if epr & EPR::CTR_TX::mask != 0 {
            self.control_in_complete();
        }
        if epr & EPR::CTR_RX::mask != 0 {
            self.control_out(epr & EPR::SETUP::mask != 0);
        }
    }

    fn control_in_complete(&mut self) {
        let usb = self.usb.block();
        let pma = self.pma.block();
        endpoint_mut(&mut self.endpoints, CONTROL).ack_transmit(usb);

        // The status stage of SET_ADDRESS completes at the old address.
        if let Some(address) = self.pending_address.take() {
            self.set_address(address);
            return;
        }

        let control = endpoint_mut(&mut self.endpoints, CONTROL);
        if control.has_remainder() {
            control.transmit(usb, pma);
        } else {
            control.finish_transmit();
        }
    }

    fn control_out(&mut self, setup: bool) {
        let usb = self.usb.block();
        let pma = self.pma.block();
        let control = endpoint_mut(&mut self.endpoints, CONTROL);

        let count = control.received(pma);
        if count > MAX_CONTROL_OUT {
            panic!("Control OUT of {} bytes", count);
        }
        let mut buffer = [0; MAX_CONTROL_OUT];
        let len = control.read(pma, &mut buffer);
        control.rearm_receive(usb, pma);

        if setup {
            match SetupPacket::parse(&buffer[..len]) {
                Some(setup) => self.setup_stage(&setup),
                None => {
                    warn!("Dropping {} byte SETUP", len);
                }
            }
        } else {
            self.data_stage(&buffer[..len]);
        }
    }

    fn setup_stage(&mut self, setup: &SetupPacket) {
        trace!("SETUP {}", setup);
        self.vendor.clear_control();

        let result = match setup.kind() {
            RequestType::Standard => self.standard_request(setup),
            RequestType::Class => {
                endpoint_mut(&mut self.endpoints, CONTROL).stage(&[]);
                Ok(())
            }
            RequestType::Vendor => {
                let control = endpoint_mut(&mut self.endpoints, CONTROL);
                if self.vendor.setup(setup, control) {
                    Ok(())
                } else {
                    Err(UsbError::Unsupported)
                }
            }
            RequestType::Reserved => Err(UsbError::Unsupported),
        };

        let usb = self.usb.block();
        let pma = self.pma.block();
        let control = endpoint_mut(&mut self.endpoints, CONTROL);
        match (result, self.policy) {
            (Ok(()), _) => {
                control.limit(setup.length.into());
                control.transmit(usb, pma);
            }
            (Err(_), UnhandledPolicy::Acknowledge) => {
                warn!("Unhandled request {=u16:#x}", setup.tag());
                control.stage(&[]);
                control.transmit(usb, pma);
            }
            (Err(_), UnhandledPolicy::Stall) => {
                warn!("Stalling request {=u16:#x}", setup.tag());
                control.stall(usb);
            }
        }
    }

    /// Stage the reply to a standard request
    fn standard_request(&mut self, setup: &SetupPacket) -> usb_device::Result<()> {
        let control = endpoint_mut(&mut self.endpoints, CONTROL);
        match setup.tag() {
            GET_DESCRIPTOR => {
                let (kind, index) = setup.descriptor();
                match self.catalog.descriptor(kind, index) {
                    Some(Descriptor::Bytes(bytes)) => control.stage(bytes),
                    Some(Descriptor::Empty) => control.stage(&[]),
                    None => return Err(UsbError::Unsupported),
                };
            }
            SET_ADDRESS => {
                self.pending_address = Some((setup.value & 0x7F) as u8);
                control.stage(&[]);
            }
            SET_CONFIGURATION => {
                self.state = match setup.value {
                    value if value == u16::from(CONFIGURATION_VALUE) => DeviceState::Configured,
                    0 => DeviceState::Initialized,
                    _ => return Err(UsbError::Unsupported),
                };
                debug!("STATE {}", self.state);
                control.stage(&[]);
            }
            GET_CONFIGURATION => {
                let configuration = match self.state {
                    DeviceState::Configured => CONFIGURATION_VALUE,
                    _ => 0,
                };
                control.stage(&[configuration]);
            }
            GET_STATUS_DEVICE => {
                control.stage(&[SELF_POWERED, 0]);
            }
            GET_STATUS_INTERFACE | GET_STATUS_ENDPOINT => {
                control.stage(&[0, 0]);
            }
            _ => return Err(UsbError::Unsupported),
        }
        Ok(())
    }

    /// Handle a control OUT that isn't a SETUP
    fn data_stage(&mut self, data: &[u8]) {
        // Status stage of an IN transfer.
        if data.is_empty() {
            return;
        }
        if !self.vendor.data(data) {
            let control = endpoint_mut(&mut self.endpoints, CONTROL);
            control.stage(&[]);
            control.transmit(self.usb.block(), self.pma.block());
        }
    }

    fn data_transfer(&mut self, index: usize) {
        let usb = self.usb.block();
        let pma = self.pma.block();

        let Some(endpoint) = self.endpoints.get_mut(index).and_then(Option::as_mut) else {
            warn!("Transfer on unused endpoint {}", index);
            if index < ENDPOINT_COUNT {
                EndpointRegister::new(usb, index).ack_complete();
            }
            return;
        };

        let epr = endpoint.register(usb).read();
        if epr & EPR::CTR_TX::mask != 0 {
            endpoint.ack_transmit(usb);
            if endpoint.has_remainder() {
                endpoint.transmit(usb, pma);
            } else {
                endpoint.finish_transmit();
            }
        }

        if epr & EPR::CTR_RX::mask != 0 {
            endpoint.ack_receive(usb);
            let mut packet = [0; MAX_PACKET_SIZE];
            let len = endpoint.read(pma, &mut packet);
            for &byte in &packet[..len] {
                if self.input.push(byte).is_err() {
                    trace!("Dropped {=u8:#x}", byte);
                }
            }
            endpoint.rearm_receive(usb, pma);
        }
    }
}

#[cfg(test)]
mod test {
    use super::{DeviceState, UnhandledPolicy, BULK, CONTROL};
    use crate::{
        descriptors::{Identity, CONFIGURATION, DEVICE, LANGUAGES},
        testing::{self, get_descriptor, Harness},
        vendor::{UartState, VendorControl},
    };
    use usb_device::UsbError;

    extern crate std;
    use std::vec::Vec;

    #[test]
    fn initialize() {
        let Harness { driver, host, .. } = testing::harness();
        assert_eq!(driver.state(), DeviceState::Initialized);
        assert_eq!(host.usb.CNTR.read(), (1 << 15) | (1 << 10));
        assert_eq!(host.usb.DADDR.read(), 0x80);
        assert_eq!(host.usb.BTABLE.read(), 0);
        assert_eq!(host.usb.EPR[0].read() & 0x070F, 0b01 << 9);
        assert_eq!(host.usb.EPR[1].read() & 0x070F, 1);
        assert_eq!(host.pma.descriptor(0).transmit_offset(), 64);
        assert_eq!(host.pma.descriptor(0).receive_offset(), 128);
        assert_eq!(host.pma.descriptor(1).transmit_offset(), 192);
        assert_eq!(host.pma.descriptor(1).receive_offset(), 256);
    }

    #[test]
    fn device_descriptor() {
        let Harness {
            mut driver, host, ..
        } = testing::harness();
        host.setup(get_descriptor(1, 0, 18));
        driver.on_interrupt();
        assert_eq!(host.transmitted(CONTROL).as_deref(), Some(&DEVICE[..]));
        assert_eq!(&DEVICE[8..12], &[0xc4, 0x10, 0x60, 0xea]);
    }

    #[test]
    fn descriptors_are_truncated() {
        let Harness {
            mut driver, host, ..
        } = testing::harness();
        for length in [0u16, 1, 8, 9, 17, 31] {
            host.setup(get_descriptor(2, 0, length));
            driver.on_interrupt();
            let sent = host.transmitted(CONTROL).unwrap();
            assert_eq!(sent, &CONFIGURATION[..usize::from(length)]);

            host.setup(get_descriptor(1, 0, length));
            driver.on_interrupt();
            let sent = host.transmitted(CONTROL).unwrap();
            assert_eq!(sent, &DEVICE[..usize::from(length).min(18)]);
        }
        host.setup(get_descriptor(2, 0, 255));
        driver.on_interrupt();
        assert_eq!(host.transmitted(CONTROL).unwrap(), &CONFIGURATION[..]);
    }

    #[test]
    fn string_descriptors() {
        let Harness {
            mut driver, host, ..
        } = testing::harness();
        host.setup(get_descriptor(3, 0, 255));
        driver.on_interrupt();
        assert_eq!(host.transmitted(CONTROL).unwrap(), &LANGUAGES[..]);

        host.setup(get_descriptor(3, 2, 255));
        driver.on_interrupt();
        let sent = host.transmitted(CONTROL).unwrap();
        let product = b"Basic console port";
        assert_eq!(sent[0] as usize, 2 + 2 * product.len());
        assert_eq!(sent[1], 3);
        let decoded: Vec<u8> = sent[2..].chunks(2).map(|unit| unit[0]).collect();
        assert_eq!(decoded, product);
    }

    #[test]
    fn full_string_ends_with_zero_length_packet() {
        let Harness {
            mut driver, host, ..
        } = testing::harness();
        driver.set_identity(Identity {
            serial_number: "0123456789012345678901234567890",
            ..Identity::DEFAULT
        });
        host.setup(get_descriptor(3, 3, 255));
        driver.on_interrupt();
        assert_eq!(host.transmitted(CONTROL).map(|sent| sent.len()), Some(64));

        host.in_complete(CONTROL);
        driver.on_interrupt();
        assert_eq!(host.transmitted(CONTROL), Some(Vec::new()));

        host.in_complete(CONTROL);
        driver.on_interrupt();
        assert_eq!(host.transmitted(CONTROL), None);

        // The host asked for exactly 64 bytes, so the full packet ends it.
        host.setup(get_descriptor(3, 3, 64));
        driver.on_interrupt();
        assert_eq!(host.transmitted(CONTROL).map(|sent| sent.len()), Some(64));
        host.in_complete(CONTROL);
        driver.on_interrupt();
        assert_eq!(host.transmitted(CONTROL), None);
    }

    #[test]
    #[should_panic]
    fn unknown_string_is_fatal() {
        let Harness {
            mut driver, host, ..
        } = testing::harness();
        host.setup(get_descriptor(3, 9, 255));
        driver.on_interrupt();
    }

    #[test]
    #[should_panic]
    fn oversized_control_out_is_fatal() {
        let Harness {
            mut driver, host, ..
        } = testing::harness();
        host.out(CONTROL, &[0; 12], true);
        driver.on_interrupt();
    }

    #[test]
    fn device_qualifier_is_empty() {
        let Harness {
            mut driver, host, ..
        } = testing::harness();
        host.setup(get_descriptor(6, 0, 10));
        driver.on_interrupt();
        assert_eq!(host.transmitted(CONTROL), Some(Vec::new()));
    }

    #[test]
    fn set_address_after_status() {
        let Harness {
            mut driver, host, ..
        } = testing::harness();
        host.setup([0x00, 0x05, 0x2A, 0x00, 0, 0, 0, 0]);
        driver.on_interrupt();
        assert_eq!(host.transmitted(CONTROL), Some(Vec::new()));
        assert_eq!(host.usb.DADDR.read(), 0x80, "Address changed before status");

        host.in_complete(CONTROL);
        driver.on_interrupt();
        assert_eq!(host.usb.DADDR.read(), 0x80 | 0x2A);
        assert_eq!(host.transmitted(CONTROL), None);

        // Applied once.
        host.in_complete(CONTROL);
        driver.on_interrupt();
        assert_eq!(host.usb.DADDR.read(), 0x80 | 0x2A);
    }

    #[test]
    fn set_configuration() {
        let Harness {
            mut driver, host, ..
        } = testing::harness();
        host.setup([0x80, 0x08, 0, 0, 0, 0, 1, 0]);
        driver.on_interrupt();
        assert_eq!(host.transmitted(CONTROL), Some([0].to_vec()));

        host.setup([0x00, 0x09, 0x01, 0x00, 0, 0, 0, 0]);
        driver.on_interrupt();
        assert_eq!(host.transmitted(CONTROL), Some(Vec::new()));
        assert_eq!(driver.state(), DeviceState::Configured);

        host.setup([0x80, 0x08, 0, 0, 0, 0, 1, 0]);
        driver.on_interrupt();
        assert_eq!(host.transmitted(CONTROL), Some([1].to_vec()));

        host.setup([0x00, 0x09, 0x00, 0x00, 0, 0, 0, 0]);
        driver.on_interrupt();
        assert_eq!(driver.state(), DeviceState::Initialized);
    }

    #[test]
    fn get_status() {
        let Harness {
            mut driver, host, ..
        } = testing::harness();
        host.setup([0x80, 0x00, 0, 0, 0, 0, 2, 0]);
        driver.on_interrupt();
        assert_eq!(host.transmitted(CONTROL), Some([1, 0].to_vec()));
        host.setup([0x82, 0x00, 0, 0, 0x81, 0, 2, 0]);
        driver.on_interrupt();
        assert_eq!(host.transmitted(CONTROL), Some([0, 0].to_vec()));
    }

    #[test]
    fn class_requests_are_acknowledged() {
        let Harness {
            mut driver, host, ..
        } = testing::harness();
        host.setup([0x21, 0x22, 0x03, 0x00, 0, 0, 0, 0]);
        driver.on_interrupt();
        assert_eq!(host.transmitted(CONTROL), Some(Vec::new()));
    }

    #[test]
    fn unhandled_requests_are_acknowledged() {
        let Harness {
            mut driver, host, ..
        } = testing::harness();
        // SET_FEATURE, and an unknown CP210x request.
        for setup in [[0x00, 0x03, 1, 0, 0, 0, 0, 0], [0x41, 0x12, 0x0F, 0, 0, 0, 0, 0]] {
            host.setup(setup);
            driver.on_interrupt();
            assert_eq!(host.transmitted(CONTROL), Some(Vec::new()));
            assert_eq!(host.transmit_status(CONTROL), 0b11);
        }
    }

    #[test]
    fn unhandled_requests_stall() {
        let Harness {
            mut driver, host, ..
        } = testing::harness();
        driver.set_unhandled_policy(UnhandledPolicy::Stall);
        host.setup([0x00, 0x03, 1, 0, 0, 0, 0, 0]);
        driver.on_interrupt();
        assert_eq!(host.transmitted(CONTROL), None);
        assert_eq!(host.transmit_status(CONTROL), 0b01);
    }

    #[test]
    fn setup_clears_receive_count() {
        let Harness {
            mut driver, host, ..
        } = testing::harness();
        host.setup(get_descriptor(1, 0, 18));
        driver.on_interrupt();
        assert_eq!(host.receive_count(CONTROL), 0);
    }

    #[test]
    fn short_setup_is_ignored() {
        let Harness {
            mut driver, host, ..
        } = testing::harness();
        host.out(CONTROL, &[0x80, 0x06], true);
        driver.on_interrupt();
        assert_eq!(host.transmitted(CONTROL), None);
        host.out(CONTROL, &[], true);
        driver.on_interrupt();
        assert_eq!(host.transmitted(CONTROL), None);
    }

    #[test]
    fn modem_control_prompt() {
        let Harness {
            mut driver, host, ..
        } = testing::harness();
        host.setup([0x41, 0x07, 0x01, 0x01, 0, 0, 0, 0]);
        driver.on_interrupt();
        assert_eq!(host.transmitted(CONTROL), Some(Vec::new()));
        assert!(driver.prompt_pending());
        // Not configured, not enabled: the request waits.
        assert!(!driver.take_prompt_request());
        testing::open_port(&mut driver, &host);
        assert!(driver.take_prompt_request());
        assert!(!driver.take_prompt_request());
    }

    #[test]
    fn set_baud_rate() {
        let Harness {
            mut driver, host, ..
        } = testing::harness();
        host.setup([0x41, 0x1E, 0, 0, 0, 0, 4, 0]);
        driver.on_interrupt();
        assert_eq!(host.transmitted(CONTROL), Some(Vec::new()));
        assert_eq!(driver.vendor_control(), VendorControl::AwaitingBaudPayload);

        host.out(CONTROL, &57_600u32.to_le_bytes(), false);
        driver.on_interrupt();
        // The status stage was staged with the SETUP.
        assert_eq!(host.transmitted(CONTROL), None);
        assert_eq!(driver.line_settings().baud_rate(), 57_600);
    }

    #[test]
    fn baud_rate_announcement_is_cleared_by_setup() {
        let Harness {
            mut driver, host, ..
        } = testing::harness();
        host.setup([0x41, 0x1E, 0, 0, 0, 0, 4, 0]);
        driver.on_interrupt();
        host.setup([0x41, 0x00, 1, 0, 0, 0, 0, 0]);
        driver.on_interrupt();

        host.out(CONTROL, &57_600u32.to_le_bytes(), false);
        driver.on_interrupt();
        assert_eq!(host.transmitted(CONTROL), Some(Vec::new()));
        assert_eq!(driver.line_settings().baud_rate(), 9600);
    }

    #[test]
    fn status_stage_sends_nothing() {
        let Harness {
            mut driver, host, ..
        } = testing::harness();
        host.out(CONTROL, &[], false);
        driver.on_interrupt();
        assert_eq!(host.transmitted(CONTROL), None);
    }

    #[test]
    fn bulk_write_requires_open_port() {
        let Harness {
            mut driver, host, ..
        } = testing::harness();
        assert_eq!(driver.bulk_write(b"hi"), Err(UsbError::InvalidState));
        host.setup([0x00, 0x09, 0x01, 0x00, 0, 0, 0, 0]);
        driver.on_interrupt();
        assert_eq!(driver.bulk_write(b"hi"), Err(UsbError::InvalidState));
        host.setup([0x41, 0x00, 1, 0, 0, 0, 0, 0]);
        driver.on_interrupt();
        assert_eq!(driver.uart_state(), UartState::Enabled);
        assert_eq!(driver.bulk_write(b"hi"), Ok(2));
        assert_eq!(host.transmitted(BULK), Some(b"hi".to_vec()));
    }

    #[test]
    fn bulk_write_chunks() {
        let Harness {
            mut driver, host, ..
        } = testing::harness();
        testing::open_port(&mut driver, &host);

        for len in [1, 63, 64, 65, 100, 128] {
            let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
            assert_eq!(driver.bulk_write(&data), Ok(len));
            let mut packets = Vec::new();
            loop {
                assert!(driver.is_transmitting());
                assert_eq!(driver.bulk_write(b"x"), Err(UsbError::WouldBlock));
                let packet = host.transmitted(BULK).unwrap();
                assert!(packet.len() <= 64);
                packets.push(packet);
                host.in_complete(BULK);
                driver.on_interrupt();
                if !driver.is_transmitting() {
                    break;
                }
            }
            assert_eq!(packets.len(), (len + 63) / 64);
            assert_eq!(packets.concat(), data);
            assert_eq!(host.transmitted(BULK), None);
        }
    }

    #[test]
    fn bulk_write_is_bounded() {
        let Harness {
            mut driver, host, ..
        } = testing::harness();
        testing::open_port(&mut driver, &host);
        let data = [0x55; 300];
        assert_eq!(driver.bulk_write(&data), Ok(crate::TRANSMIT_CAPACITY));
    }

    #[test]
    fn bulk_receive() {
        let Harness {
            mut driver,
            host,
            mut input,
            ..
        } = testing::harness();
        host.out(BULK, b"help\r", false);
        driver.on_interrupt();
        let received: Vec<u8> = input.by_ref().collect();
        assert_eq!(received, b"help\r");
        assert_eq!(host.receive_count(BULK), 0);
        assert_eq!(host.receive_status(BULK), 0b11);
    }

    #[test]
    fn bulk_receive_overflow() {
        let Harness {
            mut driver,
            host,
            mut input,
            ring,
        } = testing::harness();
        let packet = [0xA5; 64];
        // Twice the ring, and then some.
        for _ in 0..(2 * testing::RING_CAPACITY / 64 + 1) {
            host.out(BULK, &packet, false);
            driver.on_interrupt();
            // Always rearmed, regardless of space.
            assert_eq!(host.receive_status(BULK), 0b11);
        }
        assert_eq!(ring.len(), testing::RING_CAPACITY);
        assert_eq!(ring.overflow_count(), testing::RING_CAPACITY + 64);
        assert_eq!(input.by_ref().count(), testing::RING_CAPACITY);
    }

    #[test]
    fn bus_reset() {
        let Harness {
            mut driver, host, ..
        } = testing::harness();
        testing::open_port(&mut driver, &host);
        host.setup([0x00, 0x05, 0x11, 0x00, 0, 0, 0, 0]);
        driver.on_interrupt();
        driver.bulk_write(&[0; 100]).unwrap();
        assert!(driver.is_transmitting());

        host.bus_reset();
        driver.on_interrupt();
        assert_eq!(driver.state(), DeviceState::Initialized);
        assert!(!driver.is_transmitting());
        assert_eq!(host.usb.DADDR.read(), 0x80);
        // Only the RESET flag is cleared.
        assert_eq!(host.usb.ISTR.read() & (1 << 10), 0);
        assert_eq!(host.usb.ISTR.read() & (1 << 15), 1 << 15);

        // The pending address is gone.
        host.in_complete(CONTROL);
        driver.on_interrupt();
        assert_eq!(host.usb.DADDR.read(), 0x80);
    }

    #[test]
    fn unused_endpoint() {
        let Harness {
            mut driver, host, ..
        } = testing::harness();
        host.out(3, &[], false);
        driver.on_interrupt();
        assert_eq!(host.usb.EPR[3].read() & (1 << 15), 0);
        assert_eq!(host.usb.EPR[3].read() & (1 << 7), 0);
    }

    #[test]
    fn interrupts_can_be_masked() {
        let Harness {
            mut driver, host, ..
        } = testing::harness();
        driver.set_interrupts(false);
        assert_eq!(host.usb.CNTR.read(), 0);
        driver.set_interrupts(true);
        assert_eq!(host.usb.CNTR.read(), (1 << 15) | (1 << 10));
    }
}
