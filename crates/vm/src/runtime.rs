//! Runtime helper dispatch
//!
//! External calls from IL resolve here by symbol name. Helpers share the
//! VM's stores: strings and arrays are handle-indexed, console output
//! goes through the VM's output sink, and the array helpers enforce the
//! handle lifetime rules at execution time on top of the verifier's
//! static checks. The pseudo-random source is a deterministic 64-bit
//! LCG so `rt_rand_seed` makes runs reproducible.

use std::io::{BufRead, Write};

use crate::slot::{self, Handle, Slot};
use crate::trap::{TrapKind, VmError};
use crate::vm::{ArrayCell, ArrayState, Vm};

fn arity(name: &str, args: &[Slot], expected: usize) -> Result<(), VmError> {
    if args.len() != expected {
        return Err(VmError::new(TrapKind::InvalidModule)
            .with_detail(format!("{} expects {} argument(s)", name, expected)));
    }
    Ok(())
}

/// Resolve a live array cell index, enforcing the Live → Released state
/// machine.
fn array_index(vm: &Vm<'_>, handle: Slot) -> Result<usize, VmError> {
    match slot::decode(handle) {
        Handle::Array(index) if index < vm.arrays.len() => {
            if vm.arrays[index].state == ArrayState::Released {
                return Err(VmError::new(TrapKind::UseAfterRelease));
            }
            Ok(index)
        }
        Handle::Null => Err(VmError::new(TrapKind::NullPointer)),
        _ => Err(VmError::new(TrapKind::InvalidCast).with_detail("expected array handle")),
    }
}

/// Dispatch one helper call. Returns the result slot for value-returning
/// helpers.
pub(crate) fn call_helper(
    vm: &mut Vm<'_>,
    name: &str,
    args: &[Slot],
) -> Result<Option<Slot>, VmError> {
    match name {
        // Console I/O
        "rt_print_i64" => {
            arity(name, args, 1)?;
            let _ = writeln!(vm.out, "{}", args[0].as_i64());
            Ok(None)
        }
        "rt_print_f64" => {
            arity(name, args, 1)?;
            let _ = writeln!(vm.out, "{}", args[0].as_f64());
            Ok(None)
        }
        "rt_print_str" => {
            arity(name, args, 1)?;
            let text = vm.string_at(args[0])?.to_string();
            let _ = writeln!(vm.out, "{}", text);
            Ok(None)
        }
        "rt_input_line" => {
            arity(name, args, 0)?;
            let mut line = String::new();
            let _ = vm.input.read_line(&mut line);
            while line.ends_with('\n') || line.ends_with('\r') {
                line.pop();
            }
            Ok(Some(vm.new_string(line)))
        }

        // Strings
        "rt_len" => {
            arity(name, args, 1)?;
            let length = vm.string_at(args[0])?.chars().count() as i64;
            Ok(Some(Slot::from_i64(length)))
        }
        "rt_concat" => {
            arity(name, args, 2)?;
            let mut joined = vm.string_at(args[0])?.to_string();
            joined.push_str(vm.string_at(args[1])?);
            Ok(Some(vm.new_string(joined)))
        }
        "rt_substr" => {
            arity(name, args, 3)?;
            let text = vm.string_at(args[0])?;
            let start = args[1].as_i64();
            let length = args[2].as_i64();
            if start < 0 || length < 0 {
                return Err(VmError::new(TrapKind::OutOfBounds));
            }
            let taken: String = text
                .chars()
                .skip(start as usize)
                .take(length as usize)
                .collect();
            Ok(Some(vm.new_string(taken)))
        }
        "rt_str_eq" => {
            arity(name, args, 2)?;
            let equal = vm.string_at(args[0])? == vm.string_at(args[1])?;
            Ok(Some(Slot::from_bool(equal)))
        }
        "rt_to_int" => {
            arity(name, args, 1)?;
            let parsed = vm.string_at(args[0])?.trim().parse::<i64>().unwrap_or(0);
            Ok(Some(Slot::from_i64(parsed)))
        }
        "rt_int_to_str" => {
            arity(name, args, 1)?;
            let text = args[0].as_i64().to_string();
            Ok(Some(vm.new_string(text)))
        }
        "rt_f64_to_str" => {
            arity(name, args, 1)?;
            let text = format!("{}", args[0].as_f64());
            Ok(Some(vm.new_string(text)))
        }

        // Pure math
        "rt_abs_i64" => {
            arity(name, args, 1)?;
            let value = args[0]
                .as_i64()
                .checked_abs()
                .ok_or_else(|| VmError::new(TrapKind::SignedOverflow))?;
            Ok(Some(Slot::from_i64(value)))
        }
        "rt_sgn_i64" => {
            arity(name, args, 1)?;
            Ok(Some(Slot::from_i64(args[0].as_i64().signum())))
        }
        "rt_abs_f64" => {
            arity(name, args, 1)?;
            Ok(Some(Slot::from_f64(args[0].as_f64().abs())))
        }
        "rt_sqrt" => {
            arity(name, args, 1)?;
            Ok(Some(Slot::from_f64(args[0].as_f64().sqrt())))
        }
        "rt_floor" => {
            arity(name, args, 1)?;
            Ok(Some(Slot::from_f64(args[0].as_f64().floor())))
        }
        "rt_ceil" => {
            arity(name, args, 1)?;
            Ok(Some(Slot::from_f64(args[0].as_f64().ceil())))
        }
        "rt_sin" => {
            arity(name, args, 1)?;
            Ok(Some(Slot::from_f64(args[0].as_f64().sin())))
        }
        "rt_cos" => {
            arity(name, args, 1)?;
            Ok(Some(Slot::from_f64(args[0].as_f64().cos())))
        }
        "rt_pow" => {
            arity(name, args, 2)?;
            Ok(Some(Slot::from_f64(args[0].as_f64().powf(args[1].as_f64()))))
        }

        // Deterministic pseudo-random numbers
        "rt_rand" => {
            arity(name, args, 0)?;
            vm.rand_state = vm
                .rand_state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let mantissa = vm.rand_state >> 11;
            Ok(Some(Slot::from_f64(mantissa as f64 / (1u64 << 53) as f64)))
        }
        "rt_rand_seed" => {
            arity(name, args, 1)?;
            vm.rand_state = args[0].as_i64() as u64;
            Ok(None)
        }

        // Program arguments
        "rt_arg_count" => {
            arity(name, args, 0)?;
            Ok(Some(Slot::from_i64(vm.program_args().len() as i64)))
        }
        "rt_arg" => {
            arity(name, args, 1)?;
            let index = args[0].as_i64();
            let Some(arg) = usize::try_from(index)
                .ok()
                .and_then(|i| vm.program_args().get(i).cloned())
            else {
                return Err(VmError::new(TrapKind::OutOfBounds));
            };
            Ok(Some(vm.new_string(arg)))
        }

        // i32 arrays with Live → Released handle lifetime
        "rt_arr_i32_new" => {
            arity(name, args, 1)?;
            let length = args[0].as_i64();
            if length < 0 {
                return Err(VmError::new(TrapKind::OutOfBounds));
            }
            let index = vm.arrays.len();
            vm.arrays.push(ArrayCell {
                data: vec![0; length as usize],
                state: ArrayState::Live,
            });
            Ok(Some(slot::encode_array(index)))
        }
        "rt_arr_i32_len" => {
            arity(name, args, 1)?;
            let index = array_index(vm, args[0])?;
            Ok(Some(Slot::from_i64(vm.arrays[index].data.len() as i64)))
        }
        "rt_arr_i32_get" => {
            arity(name, args, 2)?;
            let index = array_index(vm, args[0])?;
            let element = args[1].as_i64();
            let value = usize::try_from(element)
                .ok()
                .and_then(|i| vm.arrays[index].data.get(i).copied())
                .ok_or_else(|| VmError::new(TrapKind::OutOfBounds))?;
            Ok(Some(Slot::from_i64(value as i64)))
        }
        "rt_arr_i32_set" => {
            arity(name, args, 3)?;
            let index = array_index(vm, args[0])?;
            let element = args[1].as_i64();
            let slot_ref = usize::try_from(element)
                .ok()
                .and_then(|i| vm.arrays[index].data.get_mut(i))
                .ok_or_else(|| VmError::new(TrapKind::OutOfBounds))?;
            *slot_ref = args[2].as_i64() as i32;
            Ok(None)
        }
        "rt_arr_i32_release" => {
            arity(name, args, 1)?;
            match slot::decode(args[0]) {
                Handle::Array(index) if index < vm.arrays.len() => {
                    if vm.arrays[index].state == ArrayState::Released {
                        return Err(VmError::new(TrapKind::DoubleRelease));
                    }
                    vm.arrays[index].state = ArrayState::Released;
                    vm.arrays[index].data.clear();
                    Ok(None)
                }
                Handle::Null => Err(VmError::new(TrapKind::NullPointer)),
                _ => Err(VmError::new(TrapKind::InvalidCast).with_detail("expected array handle")),
            }
        }

        _ => Err(VmError::new(TrapKind::UnknownCallee).with_detail(format!("@{}", name))),
    }
}
