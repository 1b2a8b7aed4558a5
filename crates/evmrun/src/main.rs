// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

// a minimal host: `evmrun [-v] FILE.bin HEXADDR` maps the image into a
// 64 KiB RAM and interrupts the VM at the given start address, then
// steps until the program returns to the halt sentinel.
//
// user functions are answered with the sum of the arguments xor-ed
// with the function id; user function 0 requests a stop. `-v` traces
// the registers and the next instruction bytes before every step.

use std::process::exit;

use embedvm_runtime::machine::Machine;
use embedvm_runtime::vm::Vm;
use memmap2::Mmap;

struct RunnerMachine {
    memory: Vec<u8>,
    stop: bool,
}

impl RunnerMachine {
    fn new(image: &[u8]) -> Self {
        let mut memory = vec![0u8; 0x10000];
        memory[..image.len()].copy_from_slice(image);
        Self {
            memory,
            stop: false,
        }
    }
}

impl Machine for RunnerMachine {
    fn mem_read(&mut self, addr: u16, is_16bit: bool) -> i16 {
        let addr = addr as usize;
        if is_16bit {
            let next = (addr + 1) & 0xffff;
            (((self.memory[addr] as u16) << 8) | self.memory[next] as u16) as i16
        } else {
            self.memory[addr] as i16
        }
    }

    fn mem_write(&mut self, addr: u16, value: i16, is_16bit: bool) {
        let addr = addr as usize;
        if is_16bit {
            let next = (addr + 1) & 0xffff;
            self.memory[addr] = (value >> 8) as u8;
            self.memory[next] = value as u8;
        } else {
            self.memory[addr] = value as u8;
        }
    }

    fn call_user(&mut self, funcid: u8, argv: &[i16]) -> i16 {
        if funcid == 0 {
            self.stop = true;
            println!("Called user function 0 => stop.");
            return 0;
        }

        print!("Called user function {} with {} args:", funcid, argv.len());
        let mut result = 0i16;
        for value in argv {
            print!(" {}", value);
            result = result.wrapping_add(*value);
        }
        println!();

        result ^ funcid as i16
    }
}

fn usage(program: &str) -> ! {
    eprintln!("Usage: {} [-v] {{binfile}} {{hex-start-addr}}", program);
    exit(1);
}

fn main() {
    let mut args: Vec<String> = std::env::args().collect();
    let program = args[0].clone();

    let mut verbose = false;
    if args.len() >= 2 && args[1] == "-v" {
        verbose = true;
        args.remove(1);
    }

    if args.len() != 3 {
        usage(&program);
    }

    let file = match std::fs::File::open(&args[1]) {
        Ok(file) => file,
        Err(_) => usage(&program),
    };
    let image = match unsafe { Mmap::map(&file) } {
        Ok(mmap) => mmap,
        Err(_) => usage(&program),
    };
    if image.len() > 0x10000 {
        eprintln!("{}: image larger than the 64 KiB address space", args[1]);
        exit(1);
    }

    let start = match u16::from_str_radix(&args[2], 16) {
        Ok(addr) => addr,
        Err(_) => usage(&program),
    };

    let mut machine = RunnerMachine::new(&image);
    let mut vm = Vm::new();
    vm.interrupt(&mut machine, start);

    while !machine.stop {
        if vm.is_halted() {
            println!("Main function returned => Terminating.");
            if vm.sp != 0 || vm.sfp != 0 {
                println!(
                    "Unexpected stack configuration on program exit: SP={:04x}, SFP={:04x}",
                    vm.sp, vm.sfp
                );
            }
            break;
        }

        if verbose {
            let ip = vm.ip as usize;
            let sp = vm.sp as usize;
            eprint!(
                "IP: {:04x} ({:02x} {:02x} {:02x} {:02x}),  ",
                vm.ip,
                machine.memory[ip & 0xffff],
                machine.memory[(ip + 1) & 0xffff],
                machine.memory[(ip + 2) & 0xffff],
                machine.memory[(ip + 3) & 0xffff]
            );
            eprint!("SP: {:04x} (", vm.sp);
            for slot in 0..4 {
                if slot > 0 {
                    eprint!(" ");
                }
                eprint!(
                    "{:02x}{:02x}",
                    machine.memory[(sp + 2 * slot) & 0xffff],
                    machine.memory[(sp + 2 * slot + 1) & 0xffff]
                );
            }
            eprintln!("), SFP: {:04x}", vm.sfp);
        }

        if let Err(trap) = vm.step(&mut machine) {
            eprintln!("{}", trap);
            exit(1);
        }
    }
}
