//! Mega MIDI is [Embassy](https://embassy.dev)-based firmware for a MIDI synthesizer built around two classic
//! console sound chips: a four-operator FM chip and a square-wave/noise PSG. The firmware runs on the [Nucleo-F767ZI
//! development board](https://www.st.com/en/evaluation-tools/nucleo-f767zi.html), which is powered by an F7-series
//! STM32 microcontroller.
//!
//! MIDI arrives over USB and over a classic 5-pin DIN port. FM patches are loaded from OPM files on an SD card,
//! picked with a rotary encoder, and up to eight of them can be kept as favourites in the microcontroller's flash.
//!
//! For details about the hardware or how to use the device, see the `README`.

#![no_std]
#![no_main]

mod chips;
mod flash_store;
mod panel;
mod sd_card;

use crate::{
    chips::{Sn76489, Ym2612},
    flash_store::FlashStore,
    panel::{ButtonEvent, Buttons, Encoder, FavoriteLeds, Screen},
    sd_card::PatchDirectory,
};
use defmt::{panic, *};
use embassy_executor::Spawner;
use embassy_futures::select::{Either, select};
use embassy_stm32::{
    Config, bind_interrupts,
    exti::ExtiInput,
    flash::Flash,
    gpio::{Input, Level, Output, Pull, Speed},
    peripherals,
    spi::{self, Spi},
    time::Hertz,
    timer::qei::{Qei, QeiPin},
    usart::{self, RingBufferedUartRx, UartRx},
    usb,
};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use embassy_time::{Delay, Duration, Instant, Ticker};
use embassy_usb::{Builder, UsbDevice, class::midi::MidiClass, driver::EndpointError};
use embedded_hal_bus::spi::ExclusiveDevice;
use mega_midi_lib::{
    configuration::DeviceConfig,
    din::DinFramer,
    synth::{Synth, Update},
    ui::SharedUi,
};
use static_cell::StaticCell;
use wmidi::MidiMessage;

use {defmt_rtt as _, panic_probe as _};

bind_interrupts!(
    #[doc(hidden)]
    struct Irqs {
        OTG_FS => usb::InterruptHandler<peripherals::USB_OTG_FS>;
        USART2 => usart::InterruptHandler<peripherals::USART2>;
    }
);

type UsbDriver = usb::Driver<'static, peripherals::USB_OTG_FS>;

/// The synthesizer as wired on this board.
pub type Device = Synth<'static, Ym2612, Sn76489, PatchDirectory, FlashStore>;

/// MIDI as it leaves the transports.
enum MidiEvent {
    /// One USB-MIDI event packet.
    Packet([u8; 4]),
    /// A message framed from the serial port.
    Message(MidiMessage<'static>),
}

const MIDI_QUEUE_DEPTH: usize = 32;

/// Carries MIDI from both transports to the control loop.
static MIDI_EVENTS: Channel<CriticalSectionRawMutex, MidiEvent, MIDI_QUEUE_DEPTH> = Channel::new();

/// Front panel state shared with the mode button.
static SHARED_UI: SharedUi = SharedUi::new();

const DIN_BAUD_RATE: u32 = 31_250;
const POLL_INTERVAL: Duration = Duration::from_millis(1);

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Initializing Mega MIDI");

    let mut config = Config::default();
    {
        use embassy_stm32::rcc::*;
        // hse: high-speed external clock
        config.rcc.hse = Some(Hse {
            freq: Hertz(8_000_000),
            mode: HseMode::Bypass,
        });

        // pll: phase-locked loop, crucial for dividing clock
        config.rcc.pll_src = PllSource::HSE;
        config.rcc.pll = Some(Pll {
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL216,
            divp: Some(PllPDiv::DIV2), // 8mhz / 4 * 216 / 2 = 216Mhz
            // per section 5.2 of RM0410: most peripheral clocks are derived from their bus clock, but the 48MHz clock used for USB OTG FS
            // is derived from main PLL VCO (PLLQ clock) or PLLSAI VCO (PLLSAI clock)
            divq: Some(PllQDiv::DIV9), // 8mhz / 4 * 216 / 9 = 48Mhz
            divr: None,
        });
        config.rcc.ahb_pre = AHBPrescaler::DIV1;
        config.rcc.apb1_pre = APBPrescaler::DIV4;
        config.rcc.apb2_pre = APBPrescaler::DIV2;
        config.rcc.sys = Sysclk::PLL1_P;
        config.rcc.mux.clk48sel = mux::Clk48sel::PLL1_Q;
    }
    let p = embassy_stm32::init(config);

    // lit when the device cannot continue
    let mut red_led = Output::new(p.PB14, Level::Low, Speed::Low);

    // SD cards must be initialised at no more than 400kHz
    let mut spi_config = spi::Config::default();
    spi_config.frequency = Hertz(400_000);
    let spi = Spi::new_blocking(p.SPI1, p.PA5, p.PA7, p.PA6, spi_config);
    let cs = Output::new(p.PD14, Level::High, Speed::VeryHigh);
    let sd_device = unwrap!(ExclusiveDevice::new(spi, cs, Delay));

    let device_config = DeviceConfig::default();
    let mut device = match PatchDirectory::mount(sd_device) {
        Ok(dir) => Synth::new(
            Ym2612::new(),
            Sn76489::new(),
            dir,
            FlashStore::new(Flash::new_blocking(p.FLASH)),
            &SHARED_UI,
            device_config,
        ),
        Err(e) => {
            error!("SD card failed to mount: {}", Debug2Format(&e));
            halt(&mut red_led).await
        }
    };
    if let Err(e) = device.mount() {
        error!("No patch to start from: {}", e);
        halt(&mut red_led).await
    }

    let button = ExtiInput::new(p.PC13, p.EXTI13, Pull::None);
    unwrap!(spawner.spawn(selection_mode_input_task(button)));

    // Create the driver, from the HAL.
    static ENDPOINT_OUT_BUFFER: StaticCell<[u8; 256]> = StaticCell::new();
    let mut config = embassy_stm32::usb::Config::default();

    // USB devices which are self-powered (i.e., that can stay powered on if unplugged from the host)
    // need to enable vbus_detection to comply with the USB spec. Per section 6.10 of the Nucleo board
    // manual (UM1974), CN13 (the USB port) cannot power the board; external power is necessary.
    // See docs on `vbus_detection` for details.
    config.vbus_detection = true;

    let driver = usb::Driver::new_fs(
        p.USB_OTG_FS,
        Irqs,
        p.PA12,
        p.PA11,
        ENDPOINT_OUT_BUFFER.init([0; 256]),
        config,
    );

    // per https://pid.codes, FOSS projects can apply to be listed under the vendor ID owned by InterBiometrics
    let vendor_id = 0x1209;
    let product_id = 0x2612;

    let mut config = embassy_usb::Config::new(vendor_id, product_id);
    config.manufacturer = Some("Pawpaw Works");
    config.product = Some("Mega MIDI");
    config.self_powered = true;
    config.max_power = 0;

    // Create embassy-usb DeviceBuilder using the driver and config.
    // It needs some buffers for building the descriptors.
    static CONFIG_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
    static BOS_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
    static CONTROL_BUFFER: StaticCell<[u8; 64]> = StaticCell::new();

    let mut builder = Builder::new(
        driver,
        config,
        CONFIG_DESCRIPTOR.init([0; 256]),
        BOS_DESCRIPTOR.init([0; 256]),
        &mut [], // no msos descriptors
        CONTROL_BUFFER.init([0; 64]),
    );

    // Create classes on the builder.
    let class = MidiClass::new(&mut builder, 0, 1, 64);

    // Build the builder.
    let usb = builder.build();

    unwrap!(spawner.spawn(usb_task(usb)));
    unwrap!(spawner.spawn(usb_midi_task(class)));

    // per RM0410, USART2_RX is served by DMA1 stream 5
    let mut uart_config = usart::Config::default();
    uart_config.baudrate = DIN_BAUD_RATE;
    let rx = unwrap!(UartRx::new(
        p.USART2,
        Irqs,
        p.PD6,
        p.DMA1_CH5,
        uart_config
    ));
    static DIN_RING_BUFFER: StaticCell<[u8; 64]> = StaticCell::new();
    let din = rx.into_ring_buffered(DIN_RING_BUFFER.init([0; 64]));
    unwrap!(spawner.spawn(din_midi_task(din)));

    let encoder = Encoder::new(Qei::new(
        p.TIM4,
        QeiPin::new(p.PD12),
        QeiPin::new(p.PD13),
    ));
    let buttons = Buttons::new(
        [
            Input::new(p.PE0, Pull::Up),
            Input::new(p.PE1, Pull::Up),
            Input::new(p.PE2, Pull::Up),
            Input::new(p.PE3, Pull::Up),
            Input::new(p.PE4, Pull::Up),
            Input::new(p.PE5, Pull::Up),
            Input::new(p.PE6, Pull::Up),
            Input::new(p.PE7, Pull::Up),
        ],
        Input::new(p.PE8, Pull::Up),
        Input::new(p.PE9, Pull::Up),
    );
    let leds = FavoriteLeds::new([
        Output::new(p.PF0, Level::Low, Speed::Low),
        Output::new(p.PF1, Level::Low, Speed::Low),
        Output::new(p.PF2, Level::Low, Speed::Low),
        Output::new(p.PF3, Level::Low, Speed::Low),
        Output::new(p.PF4, Level::Low, Speed::Low),
        Output::new(p.PF5, Level::Low, Speed::Low),
        Output::new(p.PF6, Level::Low, Speed::Low),
        Output::new(p.PF7, Level::Low, Speed::Low),
    ]);
    let screen = Screen::new(device_config.display_width);

    control_loop(device, encoder, buttons, leds, screen).await
}

/// Parks the device after a failure it cannot recover from; only a reset gets it going again.
async fn halt(led: &mut Output<'static>) -> ! {
    led.set_high();
    loop {
        embassy_time::Timer::after_secs(60).await;
    }
}

/// The single loop that owns the device state: every MIDI message and every front panel poll runs to completion
/// here, one at a time.
async fn control_loop(
    mut device: Device,
    mut encoder: Encoder,
    mut buttons: Buttons,
    mut leds: FavoriteLeds,
    screen: Screen,
) -> ! {
    let mut ticker = Ticker::every(POLL_INTERVAL);
    let mut favorite = None;
    loop {
        let update = match select(MIDI_EVENTS.receive(), ticker.next()).await {
            Either::First(MidiEvent::Packet(packet)) => device.receive_packets(&packet),
            Either::First(MidiEvent::Message(message)) => device.receive_midi(&message),
            Either::Second(()) => poll_panel(&mut device, &mut encoder, &mut buttons, &mut leds),
        };

        if update.contains(Update::NoFavorite) {
            screen.no_favorite();
        }
        if update.contains(Update::Redraw) {
            SHARED_UI.request_redraw();
        }
        if update.contains(Update::Favorite) || favorite != device.favorite() {
            favorite = device.favorite();
            trace!("Favorite indicator: {}", favorite);
        }
        leds.refresh(favorite, Instant::now());

        if SHARED_UI.take_redraw() {
            screen.draw(&device);
        } else if let Some(window) = device.poll_scroll(Instant::now()) {
            screen.scroll(window);
        }
    }
}

/// Reads the encoder and the buttons once.
fn poll_panel(
    device: &mut Device,
    encoder: &mut Encoder,
    buttons: &mut Buttons,
    leds: &mut FavoriteLeds,
) -> Update {
    let now = Instant::now();
    let mut update = match device.poll_encoder(encoder.read()) {
        Ok(update) => update,
        Err(e) => {
            warn!("Could not change file: {}", e);
            Update::none()
        }
    };

    buttons.poll(now, &mut |event| {
        update |= match event {
            ButtonEvent::Lfo => {
                device.toggle_lfo();
                Update::none()
            }
            ButtonEvent::Reset => {
                device.reset_engines();
                Update::none()
            }
            ButtonEvent::FavoritePressed(slot) => device.favorite_pressed(slot, now),
            ButtonEvent::FavoriteHeld => match device.favorite_held(now) {
                Ok(held) => {
                    if let (true, Some(slot)) = (held.contains(Update::Redraw), device.favorite()) {
                        info!("Programmed favorite {}", slot);
                        leds.confirm(slot, now);
                    }
                    held
                }
                Err(e) => {
                    error!("Could not program favorite: {}", e);
                    Update::none()
                }
            },
            ButtonEvent::FavoriteReleased => device.favorite_released().unwrap_or_else(|e| {
                error!("Could not recall favorite: {}", e);
                Update::none()
            }),
        };
    });
    update
}

/// Advances the selection mode when the mode button goes down.
///
/// This is the only code outside the control loop that touches device state, and it only ever touches
/// [`SharedUi`].
#[embassy_executor::task]
async fn selection_mode_input_task(mut button: ExtiInput<'static>) -> ! {
    loop {
        button.wait_for_rising_edge().await;
        SHARED_UI.advance_mode();
    }
}

#[embassy_executor::task]
async fn usb_task(mut usb: UsbDevice<'static, UsbDriver>) -> ! {
    usb.run().await
}

#[embassy_executor::task]
async fn usb_midi_task(mut class: MidiClass<'static, UsbDriver>) -> ! {
    loop {
        class.wait_connection().await;
        info!("USB connected");
        let _ = forward_usb_midi(&mut class).await;
        info!("USB disconnected");
    }
}

#[doc(hidden)]
struct Disconnected {}

impl From<EndpointError> for Disconnected {
    fn from(val: EndpointError) -> Self {
        match val {
            EndpointError::BufferOverflow => panic!("Buffer overflow"),
            EndpointError::Disabled => Disconnected {},
        }
    }
}

/// Helper function which hands data received over USB to the control loop, one event packet at a time.
async fn forward_usb_midi<'d, T: usb::Instance + 'd>(
    class: &mut MidiClass<'d, usb::Driver<'d, T>>,
) -> Result<(), Disconnected> {
    let mut buf = [0; 64];
    loop {
        let n = class.read_packet(&mut buf).await?;
        for packet in buf[..n].chunks_exact(4) {
            let mut event = [0; 4];
            event.copy_from_slice(packet);
            MIDI_EVENTS.send(MidiEvent::Packet(event)).await;
        }
    }
}

/// Frames bytes from the DIN port and hands the messages to the control loop.
#[embassy_executor::task]
async fn din_midi_task(mut rx: RingBufferedUartRx<'static>) -> ! {
    let mut framer = DinFramer::new();
    let mut buf = [0; 16];
    loop {
        match rx.read(&mut buf).await {
            Ok(n) => {
                for &byte in &buf[..n] {
                    if let Some(message) = framer.push(byte) {
                        MIDI_EVENTS.send(MidiEvent::Message(message)).await;
                    }
                }
            }
            Err(e) => {
                // overruns lose bytes mid-message; start over from the next status byte
                warn!("DIN receive error: {}", e);
                framer = DinFramer::new();
            }
        }
    }
}
