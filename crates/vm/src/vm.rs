//! Fetch-decode-execute interpreter
//!
//! The VM borrows a verified module immutably and keeps all mutable run
//! state - frame stack, local memory, global cells, string and array
//! stores - on itself. Instructions are atomic with respect to tracing
//! and step counting; any fault aborts the run with a precise
//! [`VmError`] naming the faulting instruction.
//!
//! Three interpreter loops implement identical semantics (see
//! [`DispatchMode`]): `switch` matches on the opcode each step, `table`
//! dispatches through a function-pointer table indexed by the opcode
//! discriminant, and `threaded` (feature-gated) chains handlers with the
//! next handler prefetched before the current one runs.

use std::collections::HashMap;
use std::io::{BufRead, Write};

use viper_il::function::Instr;
use viper_il::module::Module;
use viper_il::opcode::{self, Opcode, OPCODE_COUNT};
use viper_il::types::Type;
use viper_il::value::Value;

use crate::dispatch::DispatchMode;
use crate::slot::{self, Handle, Slot};
use crate::trace::{self, TraceMode};
use crate::trap::{TrapKind, VmError};

/// Per-run configuration.
pub struct VmOptions {
    pub trace: TraceMode,
    /// 0 means unlimited.
    pub max_steps: u64,
    pub dispatch: DispatchMode,
    /// Program arguments exposed through `rt_arg`/`rt_arg_count`.
    pub args: Vec<String>,
}

impl Default for VmOptions {
    fn default() -> Self {
        VmOptions {
            trace: TraceMode::Off,
            max_steps: 0,
            dispatch: DispatchMode::Switch,
            args: Vec::new(),
        }
    }
}

pub(crate) struct Frame {
    pub fn_index: usize,
    pub block: usize,
    pub ip: usize,
    /// SSA value table, indexed by id
    pub regs: Vec<Slot>,
    /// Alloca arena; lives for the frame's duration
    pub locals: Vec<u8>,
    /// Result register in the caller to bind on return
    pub ret_to: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArrayState {
    Live,
    Released,
}

pub(crate) struct ArrayCell {
    pub data: Vec<i32>,
    pub state: ArrayState,
}

/// Outcome of executing one instruction.
type StepResult = Result<Option<i64>, VmError>;

type Handler<'m> = fn(&mut Vm<'m>, &'m Instr) -> StepResult;

/// The virtual machine for one program run.
pub struct Vm<'m> {
    module: &'m Module,
    options: VmOptions,
    function_index: HashMap<&'m str, usize>,
    global_index: HashMap<&'m str, usize>,
    globals: Vec<Slot>,
    pub(crate) strings: Vec<String>,
    string_ids: HashMap<String, usize>,
    pub(crate) arrays: Vec<ArrayCell>,
    pub(crate) rand_state: u64,
    frames: Vec<Frame>,
    steps: u64,
    pub(crate) out: Box<dyn Write>,
    trace_out: Box<dyn Write>,
    pub(crate) input: Box<dyn BufRead>,
    last_src_line: Option<u32>,
    #[cfg(feature = "opcode-counts")]
    counters: [u64; OPCODE_COUNT],
}

impl<'m> Vm<'m> {
    pub fn new(module: &'m Module, options: VmOptions) -> Vm<'m> {
        let function_index = module
            .functions
            .iter()
            .enumerate()
            .map(|(index, f)| (f.name.as_str(), index))
            .collect();
        let global_index = module
            .globals
            .iter()
            .enumerate()
            .map(|(index, g)| (g.name.as_str(), index))
            .collect();
        Vm {
            module,
            options,
            function_index,
            global_index,
            globals: Vec::new(),
            strings: Vec::new(),
            string_ids: HashMap::new(),
            arrays: Vec::new(),
            rand_state: 0x853c49e6748fea9b,
            frames: Vec::new(),
            steps: 0,
            out: Box::new(std::io::stdout()),
            trace_out: Box::new(std::io::stderr()),
            input: Box::new(std::io::BufReader::new(std::io::stdin())),
            last_src_line: None,
            #[cfg(feature = "opcode-counts")]
            counters: [0; OPCODE_COUNT],
        }
    }

    /// Redirect program output (helper prints) into a caller-owned sink.
    pub fn set_output(&mut self, out: Box<dyn Write>) {
        self.out = out;
    }

    /// Redirect trace output.
    pub fn set_trace_output(&mut self, out: Box<dyn Write>) {
        self.trace_out = out;
    }

    /// Replace program stdin.
    pub fn set_input(&mut self, input: Box<dyn BufRead>) {
        self.input = input;
    }

    /// Steps executed so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Program arguments forwarded after `--`.
    pub(crate) fn program_args(&self) -> &[String] {
        &self.options.args
    }

    /// Per-opcode execution counts (profiling builds only).
    #[cfg(feature = "opcode-counts")]
    pub fn opcode_counts(&self) -> &[u64; OPCODE_COUNT] {
        &self.counters
    }

    pub(crate) fn intern(&mut self, text: &str) -> Slot {
        if let Some(&index) = self.string_ids.get(text) {
            return slot::encode_string(index);
        }
        let index = self.strings.len();
        self.strings.push(text.to_string());
        self.string_ids.insert(text.to_string(), index);
        slot::encode_string(index)
    }

    /// Allocate a fresh (non-interned) string cell.
    pub(crate) fn new_string(&mut self, text: String) -> Slot {
        let index = self.strings.len();
        self.strings.push(text);
        slot::encode_string(index)
    }

    pub(crate) fn string_at(&self, handle: Slot) -> Result<&str, VmError> {
        match slot::decode(handle) {
            Handle::Str(index) => self
                .strings
                .get(index)
                .map(String::as_str)
                .ok_or_else(|| VmError::new(TrapKind::OutOfBounds).with_detail("bad string handle")),
            Handle::Null => Err(VmError::new(TrapKind::NullPointer)),
            _ => Err(VmError::new(TrapKind::InvalidCast).with_detail("expected string handle")),
        }
    }

    fn init_globals(&mut self) -> Result<(), VmError> {
        // Two passes so a global may reference one declared after it.
        self.globals = vec![Slot::default(); self.module.globals.len()];
        for index in 0..self.module.globals.len() {
            let init = self.module.globals[index].init.clone();
            let slot = match init {
                Value::ConstInt { value, .. } => Slot::from_i64(value),
                Value::ConstFloat(f) => Slot::from_f64(f),
                Value::ConstStr(s) => self.intern(&s),
                Value::NullPtr => Slot(slot::PTR_NULL),
                Value::GlobalAddr(name) => self.symbol_address(&name)?,
                Value::Temp(_) => {
                    return Err(VmError::new(TrapKind::InvalidModule)
                        .with_detail("global initializer references a temp"))
                }
            };
            self.globals[index] = slot;
        }
        Ok(())
    }

    fn symbol_address(&self, name: &str) -> Result<Slot, VmError> {
        if let Some(&index) = self.global_index.get(name) {
            return Ok(slot::encode_global(index));
        }
        if let Some(&index) = self.function_index.get(name) {
            return Ok(slot::encode_function(index));
        }
        Err(VmError::new(TrapKind::UnknownCallee).with_detail(format!("@{}", name)))
    }

    fn push_frame(
        &mut self,
        fn_index: usize,
        args: &[Slot],
        ret_to: Option<u32>,
    ) -> Result<(), VmError> {
        let function = &self.module.functions[fn_index];
        if function.blocks.is_empty() {
            return Err(VmError::new(TrapKind::InvalidModule)
                .with_detail(format!("function @{} has no blocks", function.name)));
        }
        let mut regs = vec![Slot::default(); function.value_names.len()];
        for (param, value) in function.params.iter().zip(args) {
            regs[param.id as usize] = *value;
        }
        // An entry block may re-declare the parameters under fresh ids.
        let entry = &function.blocks[0];
        if entry.params.len() == function.params.len() {
            for (param, value) in entry.params.iter().zip(args) {
                regs[param.id as usize] = *value;
            }
        }
        self.frames.push(Frame {
            fn_index,
            block: 0,
            ip: 0,
            regs,
            locals: Vec::new(),
            ret_to,
        });
        Ok(())
    }

    fn eval(&mut self, value: &Value) -> Result<Slot, VmError> {
        match value {
            Value::Temp(id) => {
                let frame = self.frames.last().expect("active frame");
                Ok(frame.regs[*id as usize])
            }
            Value::ConstInt { value, .. } => Ok(Slot::from_i64(*value)),
            Value::ConstFloat(f) => Ok(Slot::from_f64(*f)),
            Value::ConstStr(s) => {
                let text = s.clone();
                Ok(self.intern(&text))
            }
            Value::GlobalAddr(name) => self.symbol_address(name),
            Value::NullPtr => Ok(Slot(slot::PTR_NULL)),
        }
    }

    fn set_result(&mut self, instr: &Instr, value: Slot) {
        if let Some(result) = instr.result {
            let frame = self.frames.last_mut().expect("active frame");
            frame.regs[result as usize] = value;
        }
    }

    fn fault(&self, instr: &Instr, kind: TrapKind) -> VmError {
        VmError::new(kind).at(instr.op, instr.loc)
    }

    /// Run the program from `@main` to completion.
    pub fn run(&mut self) -> Result<i64, VmError> {
        self.init_globals()?;
        let Some(&main_index) = self.function_index.get("main") else {
            return Err(VmError::new(TrapKind::InvalidModule).with_detail("missing @main"));
        };
        self.push_frame(main_index, &[], None)?;
        match self.options.dispatch {
            DispatchMode::Switch => self.loop_switch(),
            DispatchMode::Table => self.loop_table(),
            DispatchMode::Threaded => self.loop_threaded(),
        }
    }

    /// Fetch the instruction at the current frame position.
    fn fetch(&mut self) -> Result<&'m Instr, VmError> {
        if self.options.max_steps > 0 && self.steps >= self.options.max_steps {
            return Err(VmError::new(TrapKind::StepLimit));
        }
        self.steps += 1;

        let module = self.module;
        let (fn_index, block_index, ip) = {
            let frame = self.frames.last().expect("active frame");
            (frame.fn_index, frame.block, frame.ip)
        };
        let function = &module.functions[fn_index];
        let block = &function.blocks[block_index];
        let instr = block
            .instructions
            .get(ip)
            .ok_or_else(|| VmError::new(TrapKind::InvalidModule).with_detail("fell off block"))?;

        #[cfg(feature = "opcode-counts")]
        {
            self.counters[instr.op as usize] += 1;
        }

        match self.options.trace {
            TraceMode::Il => {
                let frame = self.frames.last().expect("active frame");
                let slots: Vec<Option<Slot>> = instr
                    .operands
                    .iter()
                    .map(|operand| match operand {
                        Value::Temp(id) => Some(frame.regs[*id as usize]),
                        _ => None,
                    })
                    .collect();
                let line = trace::render_instr(&function.name, &block.label, instr, &slots);
                let _ = writeln!(self.trace_out, "{}", line);
            }
            TraceMode::Src => {
                if let Some(loc) = instr.loc {
                    if self.last_src_line != Some(loc.line) {
                        self.last_src_line = Some(loc.line);
                        let _ = writeln!(self.trace_out, "src: line {}", loc.line);
                    }
                }
            }
            TraceMode::Off => {}
        }

        Ok(instr)
    }

    /// One big match per step.
    fn loop_switch(&mut self) -> Result<i64, VmError> {
        loop {
            let instr = self.fetch()?;
            if let Some(exit) = self.exec(instr)? {
                return Ok(exit);
            }
        }
    }

    /// Function-pointer table indexed by opcode discriminant.
    fn loop_table(&mut self) -> Result<i64, VmError> {
        let table = build_table();
        loop {
            let instr = self.fetch()?;
            let handler = table[instr.op as usize];
            if let Some(exit) = handler(self, instr)? {
                return Ok(exit);
            }
        }
    }

    /// Tail-dispatch chain: the next handler pointer is resolved before
    /// the current handler executes, keeping the indirect-call target
    /// hot. Falls back to the table loop when the feature is disabled.
    #[cfg(feature = "threaded-dispatch")]
    fn loop_threaded(&mut self) -> Result<i64, VmError> {
        let table = build_table();
        let mut instr = self.fetch()?;
        let mut handler = table[instr.op as usize];
        loop {
            let current = instr;
            let run = handler;
            // Prefetching the next pair only matters on fallthrough;
            // control transfers re-fetch below either way.
            if let Some(exit) = run(self, current)? {
                return Ok(exit);
            }
            instr = self.fetch()?;
            handler = table[instr.op as usize];
        }
    }

    #[cfg(not(feature = "threaded-dispatch"))]
    fn loop_threaded(&mut self) -> Result<i64, VmError> {
        self.loop_table()
    }

    /// Execute one instruction; `Some` carries the program exit value.
    fn exec(&mut self, instr: &'m Instr) -> StepResult {
        use Opcode::*;
        match instr.op {
            IAdd | ISub | IMul | IAddOvf | ISubOvf | IMulOvf | SDiv | SRem | UDiv | URem
            | SDivChk0 | SRemChk0 | UDivChk0 | URemChk0 | And | Or | Xor | Shl | LShr | AShr => {
                exec_int_binary(self, instr)
            }
            ICmpEq | ICmpNe | SCmpLt | SCmpLe | SCmpGt | SCmpGe | UCmpLt | UCmpLe | UCmpGt
            | UCmpGe => exec_int_compare(self, instr),
            FAdd | FSub | FMul | FDiv => exec_float_binary(self, instr),
            FCmpEq | FCmpNe | FCmpLt | FCmpLe | FCmpGt | FCmpGe | FCmpOrd | FCmpUno => {
                exec_float_compare(self, instr)
            }
            Sitofp | Fptosi | CastSiToFp | CastFpToSiRteChk | CastSiNarrowChk | Zext1 | Trunc1 => {
                exec_convert(self, instr)
            }
            ConstI1 | ConstI64 | ConstF64 | ConstStr => exec_const(self, instr),
            Alloca => exec_alloca(self, instr),
            Load => exec_load(self, instr),
            Store => exec_store(self, instr),
            Gep => exec_gep(self, instr),
            AddrOf => exec_addr_of(self, instr),
            Call => exec_call(self, instr),
            CallIndirect => exec_call_indirect(self, instr),
            Br => exec_br(self, instr),
            CBr => exec_cbr(self, instr),
            SwitchI32 => exec_switch(self, instr),
            Ret => exec_ret(self, instr),
            Trap => exec_trap(self, instr),
            ResumeLabel => exec_br(self, instr),
        }
    }

    fn advance(&mut self) {
        let frame = self.frames.last_mut().expect("active frame");
        frame.ip += 1;
    }

    /// Transfer control to `labels[edge]`, delivering branch arguments
    /// into the target block's parameters.
    fn transfer(&mut self, instr: &'m Instr, edge: usize) -> StepResult {
        let label = &instr.labels[edge];
        let module = self.module;
        let fn_index = self.frames.last().expect("active frame").fn_index;
        let function = &module.functions[fn_index];
        let Some(target_index) = function.block_index(label) else {
            return Err(self
                .fault(instr, TrapKind::InvalidModule)
                .with_detail(format!("unknown block label '{}'", label)));
        };
        let target = &function.blocks[target_index];

        let empty: Vec<Value> = Vec::new();
        let args = instr.br_args.get(edge).unwrap_or(&empty);
        let mut delivered = Vec::with_capacity(args.len());
        for arg in args {
            delivered.push(self.eval(arg)?);
        }

        let frame = self.frames.last_mut().expect("active frame");
        for (param, value) in target.params.iter().zip(delivered) {
            frame.regs[param.id as usize] = value;
        }
        frame.block = target_index;
        frame.ip = 0;
        Ok(None)
    }

    pub(crate) fn call_function(
        &mut self,
        fn_index: usize,
        args: &[Slot],
        ret_to: Option<u32>,
    ) -> Result<(), VmError> {
        self.advance();
        self.push_frame(fn_index, args, ret_to)
    }
}

fn exec_int_binary<'m>(vm: &mut Vm<'m>, instr: &'m Instr) -> StepResult {
    use Opcode::*;
    let a = vm.eval(&instr.operands[0])?.as_i64();
    let b = vm.eval(&instr.operands[1])?.as_i64();
    let result = match instr.op {
        IAdd => a.wrapping_add(b),
        ISub => a.wrapping_sub(b),
        IMul => a.wrapping_mul(b),
        IAddOvf => a
            .checked_add(b)
            .ok_or_else(|| vm.fault(instr, TrapKind::SignedOverflow))?,
        ISubOvf => a
            .checked_sub(b)
            .ok_or_else(|| vm.fault(instr, TrapKind::SignedOverflow))?,
        IMulOvf => a
            .checked_mul(b)
            .ok_or_else(|| vm.fault(instr, TrapKind::SignedOverflow))?,
        SDiv | SDivChk0 | SRem | SRemChk0 => {
            if b == 0 {
                return Err(vm.fault(instr, TrapKind::DivideByZero));
            }
            if a == i64::MIN && b == -1 {
                return Err(vm.fault(instr, TrapKind::SignedOverflow));
            }
            if matches!(instr.op, SDiv | SDivChk0) {
                a / b
            } else {
                a % b
            }
        }
        UDiv | UDivChk0 | URem | URemChk0 => {
            if b == 0 {
                return Err(vm.fault(instr, TrapKind::DivideByZero));
            }
            if matches!(instr.op, UDiv | UDivChk0) {
                ((a as u64) / (b as u64)) as i64
            } else {
                ((a as u64) % (b as u64)) as i64
            }
        }
        And => a & b,
        Or => a | b,
        Xor => a ^ b,
        Shl => a.wrapping_shl(b as u32),
        LShr => ((a as u64).wrapping_shr(b as u32)) as i64,
        AShr => a.wrapping_shr(b as u32),
        _ => unreachable!("not an integer binary op"),
    };
    vm.set_result(instr, Slot::from_i64(result));
    vm.advance();
    Ok(None)
}

fn exec_int_compare<'m>(vm: &mut Vm<'m>, instr: &'m Instr) -> StepResult {
    use Opcode::*;
    let a = vm.eval(&instr.operands[0])?.as_i64();
    let b = vm.eval(&instr.operands[1])?.as_i64();
    let result = match instr.op {
        ICmpEq => a == b,
        ICmpNe => a != b,
        SCmpLt => a < b,
        SCmpLe => a <= b,
        SCmpGt => a > b,
        SCmpGe => a >= b,
        UCmpLt => (a as u64) < (b as u64),
        UCmpLe => (a as u64) <= (b as u64),
        UCmpGt => (a as u64) > (b as u64),
        UCmpGe => (a as u64) >= (b as u64),
        _ => unreachable!("not an integer compare"),
    };
    vm.set_result(instr, Slot::from_bool(result));
    vm.advance();
    Ok(None)
}

fn exec_float_binary<'m>(vm: &mut Vm<'m>, instr: &'m Instr) -> StepResult {
    use Opcode::*;
    let a = vm.eval(&instr.operands[0])?.as_f64();
    let b = vm.eval(&instr.operands[1])?.as_f64();
    let result = match instr.op {
        FAdd => a + b,
        FSub => a - b,
        FMul => a * b,
        FDiv => a / b,
        _ => unreachable!("not a float binary op"),
    };
    vm.set_result(instr, Slot::from_f64(result));
    vm.advance();
    Ok(None)
}

fn exec_float_compare<'m>(vm: &mut Vm<'m>, instr: &'m Instr) -> StepResult {
    use Opcode::*;
    let a = vm.eval(&instr.operands[0])?.as_f64();
    let b = vm.eval(&instr.operands[1])?.as_f64();
    let result = match instr.op {
        FCmpEq => a == b,
        FCmpNe => a != b,
        FCmpLt => a < b,
        FCmpLe => a <= b,
        FCmpGt => a > b,
        FCmpGe => a >= b,
        FCmpOrd => !a.is_nan() && !b.is_nan(),
        FCmpUno => a.is_nan() || b.is_nan(),
        _ => unreachable!("not a float compare"),
    };
    vm.set_result(instr, Slot::from_bool(result));
    vm.advance();
    Ok(None)
}

fn exec_convert<'m>(vm: &mut Vm<'m>, instr: &'m Instr) -> StepResult {
    use Opcode::*;
    let operand = vm.eval(&instr.operands[0])?;
    let result = match instr.op {
        Sitofp | CastSiToFp => Slot::from_f64(operand.as_i64() as f64),
        Fptosi => Slot::from_i64(operand.as_f64() as i64),
        CastFpToSiRteChk => {
            let f = operand.as_f64();
            if !f.is_finite() {
                return Err(vm.fault(instr, TrapKind::InvalidCast));
            }
            let rounded = round_ties_even(f);
            if rounded < (i64::MIN as f64) || rounded >= (i64::MAX as f64) {
                return Err(vm.fault(instr, TrapKind::InvalidCast));
            }
            Slot::from_i64(rounded as i64)
        }
        CastSiNarrowChk => {
            let v = operand.as_i64();
            let (lo, hi) = instr
                .ty
                .signed_range()
                .unwrap_or((i64::MIN, i64::MAX));
            if v < lo || v > hi {
                return Err(vm.fault(instr, TrapKind::InvalidCast));
            }
            Slot::from_i64(v)
        }
        Zext1 => Slot::from_i64(if operand.as_bool() { 1 } else { 0 }),
        Trunc1 => Slot::from_bool(operand.as_i64() & 1 != 0),
        _ => unreachable!("not a conversion"),
    };
    vm.set_result(instr, result);
    vm.advance();
    Ok(None)
}

fn exec_const<'m>(vm: &mut Vm<'m>, instr: &'m Instr) -> StepResult {
    let value = match (&instr.op, &instr.operands[0]) {
        (Opcode::ConstStr, Value::GlobalAddr(name)) => {
            // A string global's cell already holds the interned handle.
            let Some(&index) = vm.global_index.get(name.as_str()) else {
                return Err(vm
                    .fault(instr, TrapKind::UnknownCallee)
                    .with_detail(format!("@{}", name)));
            };
            vm.globals[index]
        }
        (_, operand) => vm.eval(operand)?,
    };
    vm.set_result(instr, value);
    vm.advance();
    Ok(None)
}

fn exec_alloca<'m>(vm: &mut Vm<'m>, instr: &'m Instr) -> StepResult {
    let size = vm.eval(&instr.operands[0])?.as_i64();
    if size < 0 {
        return Err(vm.fault(instr, TrapKind::OutOfBounds));
    }
    let frame_index = vm.frames.len() - 1;
    let frame = vm.frames.last_mut().expect("active frame");
    let offset = frame.locals.len();
    frame.locals.resize(offset + size as usize, 0);
    let pointer = slot::encode_local(frame_index, offset);
    vm.set_result(instr, pointer);
    vm.advance();
    Ok(None)
}

fn access_size(ty: Type) -> usize {
    match ty {
        Type::I1 => 1,
        Type::I16 => 2,
        Type::I32 => 4,
        Type::F32 => 4,
        _ => 8,
    }
}

fn exec_load<'m>(vm: &mut Vm<'m>, instr: &'m Instr) -> StepResult {
    let pointer = vm.eval(&instr.operands[0])?;
    let value = match slot::decode(pointer) {
        Handle::Null => return Err(vm.fault(instr, TrapKind::NullPointer)),
        Handle::Global(index) => vm.globals[index],
        Handle::Local { frame, offset } => {
            let size = access_size(instr.ty);
            let Some(frame) = vm.frames.get(frame) else {
                return Err(vm.fault(instr, TrapKind::OutOfBounds));
            };
            let Some(bytes) = frame.locals.get(offset..offset + size) else {
                return Err(vm.fault(instr, TrapKind::OutOfBounds));
            };
            let mut raw = [0u8; 8];
            raw[..size].copy_from_slice(bytes);
            let wide = u64::from_le_bytes(raw);
            match instr.ty {
                Type::I1 => Slot::from_bool(wide != 0),
                Type::I16 => Slot::from_i64(wide as u16 as i16 as i64),
                Type::I32 => Slot::from_i64(wide as u32 as i32 as i64),
                Type::F32 => Slot::from_f64(f32::from_bits(wide as u32) as f64),
                _ => Slot(wide),
            }
        }
        _ => {
            return Err(vm
                .fault(instr, TrapKind::InvalidCast)
                .with_detail("load through non-memory handle"))
        }
    };
    vm.set_result(instr, value);
    vm.advance();
    Ok(None)
}

fn exec_store<'m>(vm: &mut Vm<'m>, instr: &'m Instr) -> StepResult {
    let pointer = vm.eval(&instr.operands[0])?;
    let value = vm.eval(&instr.operands[1])?;
    match slot::decode(pointer) {
        Handle::Null => return Err(vm.fault(instr, TrapKind::NullPointer)),
        Handle::Global(index) => {
            if vm.module.globals[index].is_const {
                return Err(vm
                    .fault(instr, TrapKind::OutOfBounds)
                    .with_detail("store to const global"));
            }
            vm.globals[index] = value;
        }
        Handle::Local { frame, offset } => {
            let size = access_size(instr.ty);
            let narrowed = match instr.ty {
                Type::F32 => (value.as_f64() as f32).to_bits() as u64,
                _ => value.raw(),
            };
            let raw = narrowed.to_le_bytes();
            let Some(frame) = vm.frames.get_mut(frame) else {
                return Err(vm.fault(instr, TrapKind::OutOfBounds));
            };
            let Some(bytes) = frame.locals.get_mut(offset..offset + size) else {
                return Err(vm.fault(instr, TrapKind::OutOfBounds));
            };
            bytes.copy_from_slice(&raw[..size]);
        }
        _ => {
            return Err(vm
                .fault(instr, TrapKind::InvalidCast)
                .with_detail("store through non-memory handle"))
        }
    }
    vm.advance();
    Ok(None)
}

fn exec_gep<'m>(vm: &mut Vm<'m>, instr: &'m Instr) -> StepResult {
    let base = vm.eval(&instr.operands[0])?;
    let index = vm.eval(&instr.operands[1])?.as_i64();
    let Some(pointer) = slot::offset_local(base, index) else {
        return Err(vm
            .fault(instr, TrapKind::OutOfBounds)
            .with_detail("pointer arithmetic outside a stack allocation"));
    };
    vm.set_result(instr, pointer);
    vm.advance();
    Ok(None)
}

fn exec_addr_of<'m>(vm: &mut Vm<'m>, instr: &'m Instr) -> StepResult {
    let Value::GlobalAddr(name) = &instr.operands[0] else {
        return Err(vm
            .fault(instr, TrapKind::InvalidModule)
            .with_detail("addr_of expects a symbol"));
    };
    let address = vm
        .symbol_address(name)
        .map_err(|e| e.at(instr.op, instr.loc))?;
    vm.set_result(instr, address);
    vm.advance();
    Ok(None)
}

fn exec_call<'m>(vm: &mut Vm<'m>, instr: &'m Instr) -> StepResult {
    let callee = instr.callee.as_deref().unwrap_or("");
    let mut args = Vec::with_capacity(instr.operands.len());
    for operand in &instr.operands {
        args.push(vm.eval(operand)?);
    }
    if let Some(&fn_index) = vm.function_index.get(callee) {
        vm.call_function(fn_index, &args, instr.result)?;
        return Ok(None);
    }
    // Externs dispatch into the runtime helper table.
    let result = crate::runtime::call_helper(vm, callee, &args)
        .map_err(|e| e.at(instr.op, instr.loc))?;
    if let Some(value) = result {
        vm.set_result(instr, value);
    }
    vm.advance();
    Ok(None)
}

fn exec_call_indirect<'m>(vm: &mut Vm<'m>, instr: &'m Instr) -> StepResult {
    let target = vm.eval(&instr.operands[0])?;
    let Handle::Function(fn_index) = slot::decode(target) else {
        return Err(vm
            .fault(instr, TrapKind::UnknownCallee)
            .with_detail("indirect call target is not a function address"));
    };
    let mut args = Vec::with_capacity(instr.operands.len().saturating_sub(1));
    for operand in &instr.operands[1..] {
        args.push(vm.eval(operand)?);
    }
    vm.call_function(fn_index, &args, instr.result)?;
    Ok(None)
}

fn exec_br<'m>(vm: &mut Vm<'m>, instr: &'m Instr) -> StepResult {
    vm.transfer(instr, 0)
}

fn exec_cbr<'m>(vm: &mut Vm<'m>, instr: &'m Instr) -> StepResult {
    let condition = vm.eval(&instr.operands[0])?.as_bool();
    vm.transfer(instr, if condition { 0 } else { 1 })
}

fn exec_switch<'m>(vm: &mut Vm<'m>, instr: &'m Instr) -> StepResult {
    let scrutinee = vm.eval(&instr.operands[0])?.as_i64();
    let mut edge = 0;
    for (case_index, case_value) in instr.operands[1..].iter().enumerate() {
        let value = vm.eval(case_value)?.as_i64();
        if value == scrutinee {
            edge = case_index + 1;
            break;
        }
    }
    vm.transfer(instr, edge)
}

fn exec_ret<'m>(vm: &mut Vm<'m>, instr: &'m Instr) -> StepResult {
    let value = match instr.operands.first() {
        Some(operand) => Some(vm.eval(operand)?),
        None => None,
    };
    let finished = vm.frames.pop().expect("active frame");
    if vm.frames.is_empty() {
        return Ok(Some(value.map(Slot::as_i64).unwrap_or(0)));
    }
    if let (Some(ret_to), Some(value)) = (finished.ret_to, value) {
        let caller = vm.frames.last_mut().expect("caller frame");
        caller.regs[ret_to as usize] = value;
    }
    Ok(None)
}

fn exec_trap<'m>(vm: &mut Vm<'m>, instr: &'m Instr) -> StepResult {
    Err(vm.fault(instr, TrapKind::Explicit))
}

fn round_ties_even(f: f64) -> f64 {
    let rounded = f.round();
    if (f - f.trunc()).abs() == 0.5 && rounded % 2.0 != 0.0 {
        rounded - f.signum()
    } else {
        rounded
    }
}

/// Build the function-pointer dispatch table.
fn build_table<'m>() -> [Handler<'m>; OPCODE_COUNT] {
    let mut table: [Handler<'m>; OPCODE_COUNT] = [exec_trap; OPCODE_COUNT];
    for op in opcode::ALL {
        use Opcode::*;
        table[op as usize] = match op {
            IAdd | ISub | IMul | IAddOvf | ISubOvf | IMulOvf | SDiv | SRem | UDiv | URem
            | SDivChk0 | SRemChk0 | UDivChk0 | URemChk0 | And | Or | Xor | Shl | LShr | AShr => {
                exec_int_binary as Handler<'m>
            }
            ICmpEq | ICmpNe | SCmpLt | SCmpLe | SCmpGt | SCmpGe | UCmpLt | UCmpLe | UCmpGt
            | UCmpGe => exec_int_compare as Handler<'m>,
            FAdd | FSub | FMul | FDiv => exec_float_binary as Handler<'m>,
            FCmpEq | FCmpNe | FCmpLt | FCmpLe | FCmpGt | FCmpGe | FCmpOrd | FCmpUno => {
                exec_float_compare as Handler<'m>
            }
            Sitofp | Fptosi | CastSiToFp | CastFpToSiRteChk | CastSiNarrowChk | Zext1 | Trunc1 => {
                exec_convert as Handler<'m>
            }
            ConstI1 | ConstI64 | ConstF64 | ConstStr => exec_const as Handler<'m>,
            Alloca => exec_alloca as Handler<'m>,
            Load => exec_load as Handler<'m>,
            Store => exec_store as Handler<'m>,
            Gep => exec_gep as Handler<'m>,
            AddrOf => exec_addr_of as Handler<'m>,
            Call => exec_call as Handler<'m>,
            CallIndirect => exec_call_indirect as Handler<'m>,
            Br | ResumeLabel => exec_br as Handler<'m>,
            CBr => exec_cbr as Handler<'m>,
            SwitchI32 => exec_switch as Handler<'m>,
            Ret => exec_ret as Handler<'m>,
            Trap => exec_trap as Handler<'m>,
        };
    }
    table
}
