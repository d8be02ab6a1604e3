//! Calls and metatable-aware operations

use super::{Frame, State};
use crate::error::{Error, Result};
use crate::logging::{debug, trace};
use crate::value::Value;

impl State {
    /// Call the value below the top `nargs` slots.
    ///
    /// On success the function and its arguments are replaced by its results,
    /// padded or truncated to `nresults` when given; returns the result count.
    /// On failure the stack is cut back to where the function was.
    pub fn call(&mut self, nargs: usize, nresults: Option<usize>) -> Result<usize> {
        if self.top() < nargs + 1 {
            return Err(Error::InvalidIndex(-(nargs as i32) - 1));
        }
        let func_pos = self.stack.borrow().len() - nargs - 1;
        let callee = self.stack.borrow()[func_pos].clone();

        let function = match callee {
            Value::Function(f) => f,
            other => {
                let handler = self.metafield(&other, "__call")?;
                if !matches!(handler, Value::Function(_)) {
                    self.stack.borrow_mut().truncate(func_pos);
                    return Err(Error::NotCallable(other.kind().name()));
                }
                self.stack.borrow_mut().insert(func_pos, handler);
                return self.call(nargs + 1, nresults);
            }
        };

        let depth_limit = self.global.config.max_call_depth;
        if self.call_depth() >= depth_limit {
            self.stack.borrow_mut().truncate(func_pos);
            return Err(Error::runtime(format_args!(
                "call depth limit ({}) exceeded",
                depth_limit
            )));
        }

        let native = self.global.heap.borrow().closure(function)?.func;
        trace!(args = nargs, depth = self.call_depth() + 1, "native call");

        self.frames.push(Frame {
            base: func_pos + 1,
            function: Some(function),
        });
        self.global.active_calls.set(self.global.active_calls.get() + 1);
        let outcome = native(self);
        self.global.active_calls.set(self.global.active_calls.get() - 1);
        self.frames.pop();

        let produced = match outcome {
            Ok(n) => n,
            Err(e) => {
                self.stack.borrow_mut().truncate(func_pos);
                return Err(e);
            }
        };

        let count = {
            let mut stack = self.stack.borrow_mut();
            let available = stack.len().saturating_sub(func_pos + 1);
            if produced > available {
                stack.truncate(func_pos);
                return Err(Error::runtime(format_args!(
                    "native function reported {} results but pushed {}",
                    produced, available
                )));
            }
            let split = stack.len() - produced;
            let mut results = stack.split_off(split);
            stack.truncate(func_pos);
            if let Some(wanted) = nresults {
                results.resize(wanted, Value::Nil);
            }
            let count = results.len();
            self.check_capacity(func_pos + count)?;
            stack.extend(results);
            count
        };

        if self.global.active_calls.get() == 0 {
            self.maybe_collect();
        }
        Ok(count)
    }

    /// Like `call`, but on failure also pushes the error message
    pub fn pcall(&mut self, nargs: usize, nresults: Option<usize>) -> Result<usize> {
        match self.call(nargs, nresults) {
            Ok(count) => Ok(count),
            Err(e) => {
                debug!(error = %e, "protected call failed");
                self.push(e.to_string())?;
                Err(e)
            }
        }
    }

    /// Call `func` with `args` and collect its results
    pub fn call_function(
        &mut self,
        func: impl Into<Value>,
        args: &[Value],
        nresults: Option<usize>,
    ) -> Result<Vec<Value>> {
        self.push(func)?;
        for arg in args {
            self.push(arg.clone())?;
        }
        let count = self.call(args.len(), nresults)?;
        let mut stack = self.stack.borrow_mut();
        let split = stack.len() - count;
        Ok(stack.split_off(split))
    }

    /// Field `name` of the metatable of `value` (nil when absent)
    pub fn metafield(&self, value: &Value, name: &str) -> Result<Value> {
        let Value::Userdata(u) = value else {
            return Ok(Value::Nil);
        };
        match self.userdata_metatable(*u)? {
            Some(mt) => self.raw_get_str(mt, name),
            None => Ok(Value::Nil),
        }
    }

    /// `obj[key]` for the value at `idx`, honoring `__index`
    pub fn index(&mut self, idx: i32, key: impl Into<Value>) -> Result<Value> {
        let obj = self.value_at(idx)?;
        self.index_value(obj, key.into())
    }

    pub fn index_value(&mut self, obj: Value, key: Value) -> Result<Value> {
        match obj {
            Value::Table(t) => self.raw_get(t, &key),
            Value::Userdata(_) => match self.metafield(&obj, "__index")? {
                Value::Table(t) => self.raw_get(t, &key),
                handler @ Value::Function(_) => {
                    let mut results = self.call_function(handler, &[obj, key], Some(1))?;
                    Ok(results.pop().unwrap_or_default())
                }
                _ => Err(Error::NotIndexable("userdata")),
            },
            other => Err(Error::NotIndexable(other.kind().name())),
        }
    }

    /// `obj[key] = value` for the value at `idx`, honoring `__newindex`
    pub fn set_index(
        &mut self,
        idx: i32,
        key: impl Into<Value>,
        value: impl Into<Value>,
    ) -> Result<()> {
        let obj = self.value_at(idx)?;
        let (key, value) = (key.into(), value.into());
        match obj {
            Value::Table(t) => self.raw_set(t, key, value),
            Value::Userdata(_) => match self.metafield(&obj, "__newindex")? {
                Value::Table(t) => self.raw_set(t, key, value),
                handler @ Value::Function(_) => {
                    self.call_function(handler, &[obj, key, value], Some(0))?;
                    Ok(())
                }
                _ => Err(Error::NotIndexable("userdata")),
            },
            other => Err(Error::NotIndexable(other.kind().name())),
        }
    }

    /// `#obj` for the value at `idx`, honoring `__len`
    pub fn length(&mut self, idx: i32) -> Result<Value> {
        let obj = self.value_at(idx)?;
        match obj {
            Value::Str(s) => Ok(Value::Integer(s.len() as i64)),
            Value::Table(t) => Ok(Value::Integer(self.raw_len(t)?)),
            Value::Userdata(_) => match self.metafield(&obj, "__len")? {
                handler @ Value::Function(_) => {
                    let mut results = self.call_function(handler, &[obj], Some(1))?;
                    Ok(results.pop().unwrap_or_default())
                }
                _ => Err(Error::NoLength("userdata")),
            },
            other => Err(Error::NoLength(other.kind().name())),
        }
    }

    /// `obj:name(args...)` with the `nargs` arguments on top of the stack.
    ///
    /// Behaves like `call`: arguments are consumed and the results pushed.
    pub fn call_method(&mut self, idx: i32, name: &str, nargs: usize) -> Result<usize> {
        if self.top() < nargs {
            return Err(Error::InvalidIndex(-(nargs as i32)));
        }
        let obj = self.value_at(idx)?;
        let method = self.index_value(obj.clone(), Value::str(name))?;
        if method.is_nil() {
            self.pop(nargs);
            return Err(Error::runtime(format_args!(
                "attempt to call a nil value (method '{}')",
                name
            )));
        }

        {
            let mut stack = self.stack.borrow_mut();
            let pos = stack.len() - nargs;
            stack.splice(pos..pos, [method, obj]);
        }
        self.call(nargs + 1, None)
    }

    /// Text form of the value at `idx`, honoring `__tostring`
    pub fn tostring(&mut self, idx: i32) -> Result<String> {
        let value = self.value_at(idx)?;
        match self.metafield(&value, "__tostring")? {
            handler @ Value::Function(_) => {
                let mut results = self.call_function(handler, &[value], Some(1))?;
                match results.pop() {
                    Some(Value::Str(s)) => Ok(s.to_string()),
                    _ => Err(Error::runtime("'__tostring' must return a string")),
                }
            }
            _ => Ok(value.to_string()),
        }
    }

    /// `a == b` for the values at `a` and `b`, honoring `__eq` between userdata
    pub fn equals(&mut self, a: i32, b: i32) -> Result<bool> {
        let (lhs, rhs) = (self.value_at(a)?, self.value_at(b)?);
        if lhs.raw_equal(&rhs) {
            return Ok(true);
        }
        if !matches!((&lhs, &rhs), (Value::Userdata(_), Value::Userdata(_))) {
            return Ok(false);
        }
        let mut handler = self.metafield(&lhs, "__eq")?;
        if handler.is_nil() {
            handler = self.metafield(&rhs, "__eq")?;
        }
        if handler.is_nil() {
            return Ok(false);
        }
        let mut results = self.call_function(handler, &[lhs, rhs], Some(1))?;
        Ok(results.pop().is_some_and(|v| v.is_truthy()))
    }
}
