//! # Krill Demo Firmware
//!
//! Exercises the kernel with four tasks over semihosted defmt logging:
//!
//! | Task | Primitive | Behavior |
//! |------|-----------|----------|
//! | `sampler` | `Event::signal` | Raises a flag per "sample", batch flag every 4th |
//! | `reporter` | `Event::wait` + `Mutex` | Drains coalesced flags, logs under the console mutex |
//! | `heartbeat` | `wait()` / `signal()` | Parked until the sampler pings it every 16 samples |
//! | `ticker` | `delay()` | Periodic log line, contends for the console mutex |
//!
//! The idle task naps the CPU whenever all four are blocked.

#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_std)]
#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_main)]

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod firmware {
    use core::sync::atomic::{AtomicPtr, Ordering};

    use cortex_m_rt::entry;
    use defmt_semihosting as _;
    use panic_halt as _;

    use krill::kernel;
    use krill::sync::{Event, Mutex};
    use krill::task::{TaskRef, Tcb};

    /// Flag raised for every sample.
    const FLAG_SAMPLE: u32 = 0;
    /// Flag raised once per batch of four samples.
    const FLAG_BATCH: u32 = 3;

    /// Region carved into task control blocks and stacks.
    const TASK_MEMORY_SIZE: usize = 8 * 1024;

    #[repr(align(8))]
    struct TaskMemory([u8; TASK_MEMORY_SIZE]);

    static mut TASK_MEMORY: TaskMemory = TaskMemory([0; TASK_MEMORY_SIZE]);

    static SAMPLES: Event = Event::new();
    static CONSOLE: Mutex = Mutex::new();

    /// The heartbeat task's handle, so the sampler can signal it.
    static HEARTBEAT: AtomicPtr<Tcb> = AtomicPtr::new(core::ptr::null_mut());

    extern "C" fn sampler() -> ! {
        let mut count: u32 = 0;
        loop {
            count = count.wrapping_add(1);
            SAMPLES.signal(FLAG_SAMPLE);
            if count % 4 == 0 {
                SAMPLES.signal(FLAG_BATCH);
            }
            if count % 16 == 0 {
                if let Some(task) =
                    unsafe { TaskRef::from_raw(HEARTBEAT.load(Ordering::Relaxed)) }
                {
                    kernel::signal(task);
                }
            }
            kernel::delay(10);
        }
    }

    extern "C" fn reporter() -> ! {
        loop {
            let flags = SAMPLES.wait();
            CONSOLE.acquire();
            defmt::info!("reporter: flags {=u32:04x}", flags);
            CONSOLE.release();
        }
    }

    extern "C" fn heartbeat() -> ! {
        loop {
            kernel::wait();
            CONSOLE.acquire();
            defmt::info!("heartbeat: alive at tick {=u32}", kernel::now());
            CONSOLE.release();
        }
    }

    extern "C" fn ticker() -> ! {
        loop {
            kernel::delay(250);
            CONSOLE.acquire();
            defmt::info!("ticker: {=u32}", kernel::now());
            CONSOLE.release();
        }
    }

    #[entry]
    fn main() -> ! {
        let low = core::ptr::addr_of_mut!(TASK_MEMORY) as *mut u8;
        kernel::init(low, unsafe { low.add(TASK_MEMORY_SIZE) });

        kernel::add_task(sampler, 512).expect("sampler task");
        kernel::add_task(reporter, 512).expect("reporter task");
        let hb = kernel::add_task(heartbeat, 512).expect("heartbeat task");
        HEARTBEAT.store(hb.as_ptr(), Ordering::Relaxed);
        kernel::add_task(ticker, 512).expect("ticker task");
        kernel::add_idle_task(256).expect("idle task");

        kernel::start()
    }

    #[cortex_m_rt::exception]
    unsafe fn HardFault(frame: &cortex_m_rt::ExceptionFrame) -> ! {
        defmt::error!("hard fault: {}", defmt::Debug2Format(frame));
        cortex_m::asm::udf();
    }
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
fn main() {}
