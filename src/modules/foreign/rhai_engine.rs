use super::ForeignEngine;
use crate::core::SocketBuffer;
use crate::error::{Error, Result};
use rhai::{Array, CallFnOptions, Dynamic, Engine, Scope, AST, FLOAT, INT};
use std::collections::HashMap;

/// Rhai backend. Socket windows are passed as shared arrays so scripts can
/// write outputs in place:
///
/// ```rhai
/// fn scale(input, output, factor, frame_id, n_frames) {
///     for i in 0..input.len() {
///         output[i] = input[i] * factor;
///     }
///     0
/// }
/// ```
pub struct RhaiEngine {
    engine: Engine,
    ast: AST,
    scope: Scope<'static>,
    pins: HashMap<u64, Dynamic>,
    next_pin: u64,
}

impl RhaiEngine {
    pub fn new() -> Self {
        let mut engine = Engine::new();
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(32);

        Self {
            engine,
            ast: AST::empty(),
            scope: Scope::new(),
            pins: HashMap::new(),
            next_pin: 0,
        }
    }
}

impl Default for RhaiEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn rhai_error(e: impl std::fmt::Display) -> Error {
    Error::foreign("rhai", e.to_string())
}

fn to_array(data: &SocketBuffer) -> Array {
    match data {
        SocketBuffer::I8(v) => v.iter().map(|&x| Dynamic::from_int(x as INT)).collect(),
        SocketBuffer::U8(v) => v.iter().map(|&x| Dynamic::from_int(x as INT)).collect(),
        SocketBuffer::I16(v) => v.iter().map(|&x| Dynamic::from_int(x as INT)).collect(),
        SocketBuffer::U16(v) => v.iter().map(|&x| Dynamic::from_int(x as INT)).collect(),
        SocketBuffer::I32(v) => v.iter().map(|&x| Dynamic::from_int(x as INT)).collect(),
        SocketBuffer::U32(v) => v.iter().map(|&x| Dynamic::from_int(x as INT)).collect(),
        SocketBuffer::I64(v) => v.iter().map(|&x| Dynamic::from_int(x as INT)).collect(),
        SocketBuffer::U64(v) => v.iter().map(|&x| Dynamic::from_int(x as INT)).collect(),
        SocketBuffer::F32(v) => v.iter().map(|&x| Dynamic::from_float(x as FLOAT)).collect(),
        SocketBuffer::F64(v) => v.iter().map(|&x| Dynamic::from_float(x as FLOAT)).collect(),
    }
}

fn as_int(x: &Dynamic) -> Result<INT> {
    x.as_int()
        .or_else(|_| x.as_float().map(|f| f as INT))
        .map_err(|t| rhai_error(format!("expected a number, found {}", t)))
}

fn as_float(x: &Dynamic) -> Result<FLOAT> {
    x.as_float()
        .or_else(|_| x.as_int().map(|i| i as FLOAT))
        .map_err(|t| rhai_error(format!("expected a number, found {}", t)))
}

macro_rules! unbox_into {
    ($dst:expr, $src:expr, $conv:ident, $t:ty) => {{
        for (d, s) in $dst.iter_mut().zip($src.iter()) {
            *d = $conv(s)? as $t;
        }
    }};
}

impl ForeignEngine for RhaiEngine {
    type Function = String;
    type Value = Dynamic;

    fn fresh(&self) -> Self {
        Self::new()
    }

    /// Compile `code`, run its top-level statements and keep its functions
    fn eval(&mut self, code: &str) -> Result<()> {
        let compiled = self.engine.compile(code).map_err(rhai_error)?;
        self.engine
            .run_ast_with_scope(&mut self.scope, &compiled)
            .map_err(rhai_error)?;
        self.ast = self.ast.merge(&compiled);
        Ok(())
    }

    fn function(&self, name: &str) -> Result<String> {
        if self.ast.iter_functions().any(|f| f.name == name) {
            Ok(name.to_string())
        } else {
            Err(rhai_error(format!("function '{}' is not defined", name)))
        }
    }

    fn box_array(&mut self, data: &SocketBuffer) -> Result<Dynamic> {
        Ok(Dynamic::from_array(to_array(data)).into_shared())
    }

    fn box_scalar(&mut self, data: &SocketBuffer) -> Result<Dynamic> {
        to_array(data)
            .into_iter()
            .next()
            .ok_or_else(|| rhai_error("cannot box an empty constant"))
    }

    fn box_index(&mut self, value: usize) -> Dynamic {
        Dynamic::from_int(value as INT)
    }

    fn unbox_array(&mut self, value: &Dynamic, data: &mut SocketBuffer) -> Result<()> {
        let array = value
            .read_lock::<Array>()
            .ok_or_else(|| rhai_error(format!("expected an array, found {}", value.type_name())))?;
        if array.len() != data.len() {
            return Err(rhai_error(format!(
                "array length changed ({} != {})",
                array.len(),
                data.len()
            )));
        }
        match data {
            SocketBuffer::I8(v) => unbox_into!(v, array, as_int, i8),
            SocketBuffer::U8(v) => unbox_into!(v, array, as_int, u8),
            SocketBuffer::I16(v) => unbox_into!(v, array, as_int, i16),
            SocketBuffer::U16(v) => unbox_into!(v, array, as_int, u16),
            SocketBuffer::I32(v) => unbox_into!(v, array, as_int, i32),
            SocketBuffer::U32(v) => unbox_into!(v, array, as_int, u32),
            SocketBuffer::I64(v) => unbox_into!(v, array, as_int, i64),
            SocketBuffer::U64(v) => unbox_into!(v, array, as_int, u64),
            SocketBuffer::F32(v) => unbox_into!(v, array, as_float, f32),
            SocketBuffer::F64(v) => unbox_into!(v, array, as_float, f64),
        }
        Ok(())
    }

    fn call(&mut self, function: &String, args: &[Dynamic]) -> Result<i32> {
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        let status: Dynamic = self
            .engine
            .call_fn_with_options(options, &mut self.scope, &self.ast, function, args.to_vec())
            .map_err(rhai_error)?;
        let status = status
            .as_int()
            .map_err(|t| rhai_error(format!("'{}' returned {} instead of a status", function, t)))?;
        Ok(status as i32)
    }

    fn preserve(&mut self, value: Dynamic) -> u64 {
        self.next_pin += 1;
        self.pins.insert(self.next_pin, value);
        self.next_pin
    }

    fn preserved(&self, id: u64) -> Option<Dynamic> {
        self.pins.get(&id).cloned()
    }

    fn release(&mut self, id: u64) {
        self.pins.remove(&id);
    }
}
