//! A small interpreter for finalized fast-path programs.
//!
//! Executes the mainline from instruction zero with a sparse byte
//! memory, a virtual register file and a flags register, following
//! branches into outlined regions and back. Runtime helpers get just
//! enough built-in semantics to let the fast paths be driven through
//! their slow edges; every helper invocation and every executed CAS is
//! counted so tests can assert how often the slow machinery ran.

use opal_jit::{Cond, Inst, Program, Width};
use opal_jit::reloc::RelocKind;
use opal_runtime::{RuntimeHelper, ThreadLayout};
use rustc_hash::FxHashMap;

pub const THREAD_BASE: u64 = 0x10_0000;

pub struct Machine {
    mem: FxHashMap<u64, u8>,
    regs: FxHashMap<u32, u64>,
    flags: (u64, u64),
    pub thread: ThreadLayout,
    pub patches: FxHashMap<RelocKind, u64>,
    pub helper_calls: Vec<RuntimeHelper>,
    pub cas_count: usize,
    /// Bump cursor the emulated allocation helpers hand memory from.
    pub slow_cursor: u64,
}

impl Machine {
    pub fn new() -> Self {
        Machine {
            mem: FxHashMap::default(),
            regs: FxHashMap::default(),
            flags: (0, 0),
            thread: ThreadLayout::new(),
            patches: FxHashMap::default(),
            helper_calls: Vec::new(),
            cas_count: 0,
            slow_cursor: 0x80_0000,
        }
    }

    // ---- memory ----

    pub fn read_u8(&self, addr: u64) -> u8 {
        *self.mem.get(&addr).unwrap_or(&0)
    }

    pub fn write_u8(&mut self, addr: u64, value: u8) {
        self.mem.insert(addr, value);
    }

    pub fn read_u32(&self, addr: u64) -> u32 {
        let mut out = 0u32;
        for i in 0..4 {
            out |= (self.read_u8(addr + i) as u32) << (8 * i);
        }
        out
    }

    pub fn write_u32(&mut self, addr: u64, value: u32) {
        for i in 0..4 {
            self.write_u8(addr + i, (value >> (8 * i)) as u8);
        }
    }

    pub fn read_u64(&self, addr: u64) -> u64 {
        let mut out = 0u64;
        for i in 0..8 {
            out |= (self.read_u8(addr + i) as u64) << (8 * i);
        }
        out
    }

    pub fn write_u64(&mut self, addr: u64, value: u64) {
        for i in 0..8 {
            self.write_u8(addr + i, (value >> (8 * i)) as u8);
        }
    }

    // ---- thread block ----

    pub fn thread_field(&self, offset: i32) -> u64 {
        self.read_u64(THREAD_BASE.wrapping_add(offset as u64))
    }

    pub fn set_thread_field(&mut self, offset: i32, value: u64) {
        self.write_u64(THREAD_BASE.wrapping_add(offset as u64), value);
    }

    // ---- registers ----

    pub fn reg(&self, vreg: opal_jit::Vreg) -> u64 {
        *self.regs.get(&vreg.index()).unwrap_or(&0)
    }

    pub fn set_reg(&mut self, vreg: opal_jit::Vreg, value: u64) {
        self.regs.insert(vreg.index(), value);
    }

    pub fn helper_count(&self, helper: RuntimeHelper) -> usize {
        self.helper_calls.iter().filter(|h| **h == helper).count()
    }

    // ---- execution ----

    pub fn run(&mut self, program: &Program) {
        let mut pc = 0usize;
        let mut steps = 0usize;
        loop {
            if pc >= program.insts.len() {
                break;
            }
            steps += 1;
            assert!(steps < 1_000_000, "runaway program");
            let mut jumped = false;
            match &program.insts[pc] {
                Inst::Bind(_) => {}
                Inst::LoadThread { dst, offset } => {
                    let value = self.thread_field(*offset);
                    self.set_reg(*dst, value);
                }
                Inst::StoreThread { offset, src } => {
                    let value = self.reg(*src);
                    self.set_thread_field(*offset, value);
                }
                Inst::Load {
                    dst,
                    base,
                    offset,
                    width,
                } => {
                    let addr = self.reg(*base).wrapping_add(*offset as u64);
                    let value = match width {
                        Width::W32 => self.read_u32(addr) as u64,
                        Width::W64 => self.read_u64(addr),
                    };
                    self.set_reg(*dst, value);
                }
                Inst::Store {
                    base,
                    offset,
                    src,
                    width,
                } => {
                    let addr = self.reg(*base).wrapping_add(*offset as u64);
                    let value = self.reg(*src);
                    match width {
                        Width::W32 => self.write_u32(addr, value as u32),
                        Width::W64 => self.write_u64(addr, value),
                    }
                }
                Inst::StoreImm {
                    base,
                    offset,
                    value,
                    width,
                } => {
                    let addr = self.reg(*base).wrapping_add(*offset as u64);
                    match width {
                        Width::W32 => self.write_u32(addr, *value as u32),
                        Width::W64 => self.write_u64(addr, *value as u64),
                    }
                }
                Inst::StoreByteIndexed { base, index, value } => {
                    let addr = self.reg(*base).wrapping_add(self.reg(*index));
                    self.write_u8(addr, *value);
                }
                Inst::MovImm { dst, value } => self.set_reg(*dst, *value as u64),
                Inst::MovPatchable { dst, kind } => {
                    let value = *self
                        .patches
                        .get(kind)
                        .unwrap_or_else(|| panic!("no patch value for {:?}", kind));
                    self.set_reg(*dst, value);
                }
                Inst::Mov { dst, src } => {
                    let value = self.reg(*src);
                    self.set_reg(*dst, value);
                }
                Inst::Add { dst, src } => {
                    let value = self.reg(*dst).wrapping_add(self.reg(*src));
                    self.set_reg(*dst, value);
                }
                Inst::AddImm { dst, imm } => {
                    let value = self.reg(*dst).wrapping_add(*imm as u64);
                    self.set_reg(*dst, value);
                }
                Inst::Sub { dst, src } => {
                    let value = self.reg(*dst).wrapping_sub(self.reg(*src));
                    self.set_reg(*dst, value);
                }
                Inst::SubImm { dst, imm } => {
                    let value = self.reg(*dst).wrapping_sub(*imm as u64);
                    self.set_reg(*dst, value);
                }
                Inst::AndImm { dst, imm } => {
                    let value = self.reg(*dst) & *imm as u64;
                    self.set_reg(*dst, value);
                }
                Inst::OrImm { dst, imm } => {
                    let value = self.reg(*dst) | *imm as u64;
                    self.set_reg(*dst, value);
                }
                Inst::ShlImm { dst, shift } => {
                    let value = self.reg(*dst) << shift;
                    self.set_reg(*dst, value);
                }
                Inst::ShrImm { dst, shift } => {
                    let value = self.reg(*dst) >> shift;
                    self.set_reg(*dst, value);
                }
                Inst::Cmp { a, b } => self.flags = (self.reg(*a), self.reg(*b)),
                Inst::CmpImm { a, imm } => self.flags = (self.reg(*a), *imm as u64),
                Inst::CmpThread { a, offset } => {
                    self.flags = (self.reg(*a), self.thread_field(*offset));
                }
                Inst::Cas {
                    base,
                    offset,
                    expected,
                    desired,
                    width,
                } => {
                    self.cas_count += 1;
                    let addr = self.reg(*base).wrapping_add(*offset as u64);
                    let observed = match width {
                        Width::W32 => self.read_u32(addr) as u64,
                        Width::W64 => self.read_u64(addr),
                    };
                    if observed == self.reg(*expected) {
                        let value = self.reg(*desired);
                        match width {
                            Width::W32 => self.write_u32(addr, value as u32),
                            Width::W64 => self.write_u64(addr, value),
                        }
                        self.flags = (0, 0);
                    } else {
                        self.set_reg(*expected, observed);
                        self.flags = (1, 0);
                    }
                }
                Inst::Branch { cond, target } => {
                    if self.cond_holds(*cond) {
                        pc = program.label_offset(*target);
                        jumped = true;
                    }
                }
                Inst::Jump { target } => {
                    pc = program.label_offset(*target);
                    jumped = true;
                }
                Inst::CallHelper { helper, result, .. } => {
                    let value = self.call_helper(*helper);
                    if let Some(dst) = result {
                        self.set_reg(*dst, value);
                    }
                }
            }
            if !jumped {
                pc += 1;
                // Falling off the end of the mainline ends execution;
                // the code past it is cold and reached only by branch.
                if pc == program.mainline_len {
                    break;
                }
            }
        }
    }

    fn cond_holds(&self, cond: Cond) -> bool {
        let (a, b) = self.flags;
        match cond {
            Cond::Eq => a == b,
            Cond::Ne => a != b,
            Cond::UnsignedGt => a > b,
            Cond::UnsignedGe => a >= b,
            Cond::UnsignedLt => a < b,
            Cond::UnsignedLe => a <= b,
        }
    }

    /// Built-in helper semantics, enough to drive the slow edges. The
    /// header offsets mirror the standard layout used by the tests.
    fn call_helper(&mut self, helper: RuntimeHelper) -> u64 {
        self.helper_calls.push(helper);
        let arg0 = self.thread_field(self.thread.helper_arg0);
        let arg1 = self.thread_field(self.thread.helper_arg1);
        match helper {
            RuntimeHelper::AllocateObject => {
                let addr = self.bump_slow(0x100);
                self.write_u64(addr, arg0);
                self.write_u32(addr + 8, 0);
                addr
            }
            RuntimeHelper::AllocateArray => {
                let addr = self.bump_slow(0x1000);
                self.write_u64(addr, arg0);
                self.write_u32(addr + 8, 0);
                self.write_u32(addr + 12, arg1 as u32);
                if arg1 == 0 {
                    self.write_u32(addr + 16, 0);
                }
                addr
            }
            RuntimeHelper::MonitorEnter | RuntimeHelper::MonitorEnterReserved => {
                // Claim an unowned word for the caller; anything more
                // contended than that is left to the test to inspect.
                // Lock word offset 16, as in the layouts the tests use.
                let lock_addr = arg0 + 16;
                if arg0 != 0 && self.read_u64(lock_addr) == 0 {
                    let tid = self.thread_field(self.thread.thread_id);
                    self.write_u64(lock_addr, tid);
                }
                0
            }
            RuntimeHelper::MonitorExit => 0,
            RuntimeHelper::WriteBarrierStore => {
                // Dirty the destination's card when the geometry is
                // patched in, mirroring what the runtime stub does.
                if let (Some(&heap_base), Some(&table)) = (
                    self.patches.get(&RelocKind::HeapBase),
                    self.patches.get(&RelocKind::CardTableBase),
                ) {
                    let index = (arg0.wrapping_sub(heap_base)) >> 9;
                    self.write_u8(table + index, 1);
                }
                0
            }
            RuntimeHelper::WriteBarrierBatch => 0,
        }
    }

    fn bump_slow(&mut self, size: u64) -> u64 {
        let addr = self.slow_cursor;
        self.slow_cursor += size;
        addr
    }
}

impl Default for Machine {
    fn default() -> Self {
        Machine::new()
    }
}
