//! Continuous capture of the shift-register chain over SPI2
//!
//! # Design
//! The 74HC165 chain is read like a simplex SPI slave. The hardware chip select drives the latch
//! line: idle low keeps the registers loading the parallel inputs, asserted high freezes them and
//! enables shifting while SCK clocks one 32-bit frame out of MISO.
//!
//! Three DMA streams and two TIM2 compare channels automate the frames, the same way the ADC
//! inputs of Stabilizer are sampled:
//! * TIM2 CH1 (counter 0) clears the SPI EOT flag through IFCR.
//! * TIM2 CH2 (counter 2) writes CSTART into CR1 to start one frame.
//! * The data stream moves the received word from the RX FIFO into RAM and raises a
//!   transfer-complete interrupt.
//!
//! The frame-complete interrupt swaps the RAM buffer and hands the completed word to the
//! [serin::hardware::HardwareSampler]. The RX FIFO covers the swap-over window.
use core::ptr::addr_of_mut;

use serin::hardware::FrameCapture;

use super::{hal, timers};

use hal::dma::{
    config::Priority,
    dma::{DMAReq, DmaConfig},
    traits::TargetAddress,
    MemoryToPeripheral, PeripheralToMemory, Transfer,
};

// Written by the CH2 trigger into SPI2 CR1 to start a frame. AXI SRAM is not initialized on boot,
// the value is set up in `SerInCapture::new()`.
#[link_section = ".axisram.buffers"]
static mut SPI_START: [u32; 1] = [0x00; 1];

// Written by the CH1 trigger into SPI2 IFCR to clear the EOT flag.
#[link_section = ".axisram.buffers"]
static mut SPI_EOT_CLEAR: [u32; 1] = [0x00];

// Ping-pong frame buffers. One is being filled while the other is read.
#[link_section = ".axisram.buffers"]
static mut FRAME_BUF: [[u32; 1]; 2] = [[0; 1]; 2];

/// SPI2 CR1 as the target of the TIM2 CH2 DMA request.
struct Spi2Cr {
    _channel: timers::Channel2,
}

// Note(unsafe): Only one instance exists, it owns the TIM2 CH2 compare channel that generates
// the request.
unsafe impl TargetAddress<MemoryToPeripheral> for Spi2Cr {
    type MemSize = u32;

    const REQUEST_LINE: Option<u8> = Some(DMAReq::Tim2Ch2 as u8);

    fn address(&self) -> usize {
        // Note(unsafe): The SPI is owned by the data transfer. This only writes a control
        // register.
        let regs = unsafe { &*hal::stm32::SPI2::ptr() };
        &regs.cr1 as *const _ as usize
    }
}

/// SPI2 IFCR as the target of the TIM2 CH1 DMA request.
struct Spi2Ifcr {
    _channel: timers::Channel1,
}

// Note(unsafe): Only one instance exists, it owns the TIM2 CH1 compare channel.
unsafe impl TargetAddress<MemoryToPeripheral> for Spi2Ifcr {
    type MemSize = u32;

    const REQUEST_LINE: Option<u8> = Some(DMAReq::Tim2Ch1 as u8);

    fn address(&self) -> usize {
        let regs = unsafe { &*hal::stm32::SPI2::ptr() };
        &regs.ifcr as *const _ as usize
    }
}

pub struct SerInCapture {
    next_buffer: Option<&'static mut [u32; 1]>,
    transfer: Transfer<
        hal::dma::dma::Stream2<hal::stm32::DMA1>,
        hal::spi::Spi<hal::stm32::SPI2, hal::spi::Disabled, u32>,
        PeripheralToMemory,
        &'static mut [u32; 1],
        hal::dma::DBTransfer,
    >,
    trigger_transfer: Transfer<
        hal::dma::dma::Stream1<hal::stm32::DMA1>,
        Spi2Cr,
        MemoryToPeripheral,
        &'static mut [u32; 1],
        hal::dma::DBTransfer,
    >,
    clear_transfer: Transfer<
        hal::dma::dma::Stream0<hal::stm32::DMA1>,
        Spi2Ifcr,
        MemoryToPeripheral,
        &'static mut [u32; 1],
        hal::dma::DBTransfer,
    >,
    timer: timers::SamplingTimer,
}

impl SerInCapture {
    /// Construct the capture.
    ///
    /// # Args
    /// * `spi` - SPI2, configured as receiver with hardware chip select on the latch line.
    /// * `clear_stream` - The DMA stream clearing the EOT flag.
    /// * `trigger_stream` - The DMA stream starting each frame.
    /// * `data_stream` - The DMA stream moving frames into RAM.
    /// * `timer` - The paused sampling timer with its period set.
    pub fn new(
        spi: hal::spi::Spi<hal::stm32::SPI2, hal::spi::Enabled, u32>,
        clear_stream: hal::dma::dma::Stream0<hal::stm32::DMA1>,
        trigger_stream: hal::dma::dma::Stream1<hal::stm32::DMA1>,
        data_stream: hal::dma::dma::Stream2<hal::stm32::DMA1>,
        mut timer: timers::SamplingTimer,
    ) -> Option<Self> {
        let channels = timer.channels()?;

        // The flag clear must complete before the trigger.
        let clear_config = DmaConfig::default()
            .priority(Priority::VeryHigh)
            .circular_buffer(true);

        // Note(unsafe): Written once before the transfer is started.
        unsafe {
            SPI_EOT_CLEAR[0] = 1 << 3;
        }

        channels.ch1.listen_dma();
        channels.ch1.to_output_compare(0);

        let clear_transfer: Transfer<_, _, MemoryToPeripheral, _, _> =
            Transfer::init(
                clear_stream,
                Spi2Ifcr {
                    _channel: channels.ch1,
                },
                // Note(unsafe): Memory->Peripheral, never modified.
                unsafe { &mut *addr_of_mut!(SPI_EOT_CLEAR) },
                None,
                clear_config,
            );

        channels.ch2.listen_dma();
        channels.ch2.to_output_compare(2);

        let trigger_config = DmaConfig::default()
            .priority(Priority::High)
            .circular_buffer(true);

        // Note(unsafe): Written once before the transfer is started.
        unsafe {
            // CSTART | SPE
            SPI_START[0] = 0x201;
        }

        let trigger_transfer: Transfer<_, _, MemoryToPeripheral, _, _> =
            Transfer::init(
                trigger_stream,
                Spi2Cr {
                    _channel: channels.ch2,
                },
                // Note(unsafe): Memory->Peripheral, never modified.
                unsafe { &mut *addr_of_mut!(SPI_START) },
                None,
                trigger_config,
            );

        let data_config = DmaConfig::default()
            .memory_increment(true)
            .transfer_complete_interrupt(true)
            .priority(Priority::VeryHigh);

        let spi = spi.disable();

        // Note(unsafe): FRAME_BUF is owned by this capture and not used anywhere else.
        let [first, second] = unsafe { &mut *addr_of_mut!(FRAME_BUF) };
        let transfer: Transfer<_, _, PeripheralToMemory, _, _> =
            Transfer::init(data_stream, spi, first, None, data_config);

        Some(Self {
            next_buffer: Some(second),
            transfer,
            trigger_transfer,
            clear_transfer,
            timer,
        })
    }
}

impl FrameCapture for SerInCapture {
    fn start(&mut self) {
        self.transfer.start(|spi| {
            spi.enable_dma_rx();

            spi.inner().cr2.modify(|_, w| w.tsize().bits(1));
            spi.inner().cr1.modify(|_, w| w.spe().set_bit());
        });

        self.clear_transfer.start(|_| {});
        self.trigger_transfer.start(|_| {});

        self.timer.start();
    }

    fn stop(&mut self) {
        self.timer.pause();
    }

    fn completed_frame(&mut self) -> Option<u32> {
        if !self.transfer.get_transfer_complete_flag() {
            return None;
        }
        self.transfer.clear_interrupts();

        // If the buffer swap fails, no further frames are delivered and the monitor reports a
        // stall.
        let next_buffer = self.next_buffer.take()?;
        let (prev_buffer, _, _) = self.transfer.next_transfer(next_buffer).ok()?;
        let word = prev_buffer[0];
        self.next_buffer.replace(prev_buffer);
        Some(word)
    }
}
