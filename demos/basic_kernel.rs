//! Preemptive multithreading demo kernel for Raspberry Pi Zero 2 W.
//!
//! Three threads at different priorities, plus a fourth that demonstrates
//! priority donation through a shared lock. Switched by timer interrupts
//! once preemption is armed.
//!
//! # Building for Real Hardware
//!
//! ```bash
//! cargo +nightly build --release --example basic_kernel --target aarch64-unknown-none
//! rust-objcopy -O binary target/aarch64-unknown-none/release/examples/basic_kernel kernel8.img
//! ```
//!
//! # Deploying to Raspberry Pi Zero 2 W
//!
//! 1. Format SD card as FAT32
//! 2. Copy to SD card:
//!    - `kernel8.img` (your kernel)
//!    - `bootcode.bin`, `start.elf`, `fixup.dat` (from RPi firmware)
//! 3. Create `config.txt`:
//!    ```
//!    arm_64bit=1
//!    kernel=kernel8.img
//!    ```
//! 4. Wire serial: GPIO14→RX, GPIO15→TX, GND→GND
//! 5. Connect: `screen /dev/tty.usbserial* 115200`

#![no_std]
#![no_main]

extern crate alloc;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use kernel_sched_core::arch::{aarch64, Arch, DefaultArch};
use kernel_sched_core::sched::{self, Policy};
use kernel_sched_core::sync::Lock;
use kernel_sched_core::{pl011_println, ThreadBuilder};

/// Simple bump allocator for the heap.
mod allocator {
    use core::alloc::{GlobalAlloc, Layout};
    use core::cell::UnsafeCell;
    use core::ptr::null_mut;
    use core::sync::atomic::{AtomicUsize, Ordering};

    const HEAP_SIZE: usize = 16 * 1024 * 1024; // 16 MB

    #[repr(C, align(16))]
    struct Heap {
        data: UnsafeCell<[u8; HEAP_SIZE]>,
        next: AtomicUsize,
    }

    unsafe impl Sync for Heap {}

    static HEAP: Heap = Heap {
        data: UnsafeCell::new([0; HEAP_SIZE]),
        next: AtomicUsize::new(0),
    };

    pub struct BumpAllocator;

    unsafe impl GlobalAlloc for BumpAllocator {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            let size = layout.size();
            let align = layout.align();

            loop {
                let current = HEAP.next.load(Ordering::Relaxed);
                let aligned = (current + align - 1) & !(align - 1);
                let new_next = aligned + size;

                if new_next > HEAP_SIZE {
                    return null_mut();
                }

                if HEAP
                    .next
                    .compare_exchange(current, new_next, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    let heap_start = HEAP.data.get() as *mut u8;
                    return heap_start.add(aligned);
                }
            }
        }

        unsafe fn dealloc(&self, _ptr: *mut u8, _layout: Layout) {
            // Bump allocator doesn't support deallocation
        }
    }
}

#[global_allocator]
static ALLOCATOR: allocator::BumpAllocator = allocator::BumpAllocator;

/// Kernel entry point - called from boot code after hardware init.
#[no_mangle]
pub fn kernel_main() -> ! {
    sched::init::<DefaultArch>(Policy::Priority);

    let shared = Arc::new(Lock::<DefaultArch>::new());

    // Two CPU-bound workers at distinct base priorities.
    let w1 = shared.clone();
    ThreadBuilder::new()
        .name(String::from("worker-lo"))
        .priority(25)
        .spawn(move || loop {
            w1.acquire();
            pl011_println!("worker-lo holds the shared lock");
            w1.release();
            kernel_sched_core::yield_now();
        })
        .expect("failed to spawn worker-lo");

    let w2 = shared.clone();
    ThreadBuilder::new()
        .name(String::from("worker-hi"))
        .priority(35)
        .spawn(move || loop {
            w2.acquire();
            pl011_println!("worker-hi holds the shared lock");
            w2.release();
            kernel_sched_core::yield_now();
        })
        .expect("failed to spawn worker-hi");

    // Set up the preemption timer (1ms time slices).
    unsafe {
        aarch64::setup_preemption_timer(1000).expect("failed to set up timer");
    }

    DefaultArch::enable_interrupts();

    sched::start::<DefaultArch>().expect("no threads to run");

    // `start` transfers control into the first thread's context on real
    // hardware and never returns here.
    loop {
        unsafe {
            core::arch::asm!("wfe");
        }
    }
}

// Panic handler is provided by the library.
