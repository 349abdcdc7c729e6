//! Text parser for IL modules
//!
//! Line-oriented recursive descent, mirroring the shape of the printed
//! form: directives and declarations are one line each, function bodies
//! are brace-delimited with one block header or instruction per line.
//! The parser stops at the first fatal error and returns a single
//! diagnostic carrying the offending line number; no recovery is
//! attempted.
//!
//! Accepted preamble noise: an optional UTF-8 BOM, blank lines, and
//! comment lines starting with `#` or `//`. The first substantive line
//! must be the `il <version>` directive.

use std::collections::HashMap;

use crate::diag::Diagnostic;
use crate::escape;
use crate::function::{BasicBlock, Function, Instr, Param};
use crate::module::{Extern, Global, Module};
use crate::opcode::Opcode;
use crate::types::Type;
use crate::value::Value;

/// Parse IL text into a module.
pub fn parse(text: &str) -> Result<Module, Diagnostic> {
    Parser::new(text).parse()
}

struct Parser<'a> {
    lines: Vec<&'a str>,
    pos: usize,
    module: Module,
}

/// Per-function parsing state: SSA name scope and the function under
/// construction.
struct FnCtx {
    function: Function,
    scope: HashMap<String, u32>,
}

impl FnCtx {
    fn define(&mut self, name: &str, ty_hint: Option<Type>) -> u32 {
        let _ = ty_hint;
        let id = self.function.new_temp(Some(name));
        self.scope.insert(name.to_string(), id);
        id
    }

    fn lookup(&self, name: &str) -> Option<u32> {
        self.scope.get(name).copied()
    }
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Parser<'a> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        Parser {
            lines: text.lines().collect(),
            pos: 0,
            module: Module::default(),
        }
    }

    fn line_no(&self) -> u32 {
        self.pos as u32
    }

    fn err(&self, message: impl Into<String>) -> Diagnostic {
        Diagnostic::error(message).at_line(self.line_no())
    }

    fn err_at(&self, line: u32, message: impl Into<String>) -> Diagnostic {
        Diagnostic::error(message).at_line(line)
    }

    /// Advance to the next non-blank, non-comment line.
    fn next_content_line(&mut self) -> Option<&'a str> {
        while self.pos < self.lines.len() {
            let raw = self.lines[self.pos];
            self.pos += 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("//") {
                continue;
            }
            return Some(trimmed);
        }
        None
    }

    fn parse(mut self) -> Result<Module, Diagnostic> {
        let first = self
            .next_content_line()
            .ok_or_else(|| self.err("missing 'il' version directive"))?;
        let mut words = first.split_whitespace();
        if words.next() != Some("il") {
            return Err(self.err("missing 'il' version directive"));
        }
        let version = words
            .next()
            .ok_or_else(|| self.err("missing version after 'il' directive"))?;
        self.module.version = version.to_string();

        while let Some(line) = self.next_content_line() {
            let keyword = first_word(line);
            match keyword {
                "target" => self.parse_target(line)?,
                "extern" => self.parse_extern(line)?,
                "global" => self.parse_global(line)?,
                "func" => self.parse_function(line)?,
                _ => return Err(self.err(format!("unexpected line: {}", line))),
            }
        }
        Ok(self.module)
    }

    fn parse_target(&mut self, line: &str) -> Result<(), Diagnostic> {
        let rest = line["target".len()..].trim();
        let (triple, tail) = self.parse_string_literal(rest)?;
        if !tail.trim().is_empty() {
            return Err(self.err("unexpected characters after closing '\"'"));
        }
        self.module.target = Some(triple);
        Ok(())
    }

    fn parse_extern(&mut self, line: &str) -> Result<(), Diagnostic> {
        // extern @name(t, ...) -> t
        let rest = line["extern".len()..].trim();
        let rest = rest
            .strip_prefix('@')
            .ok_or_else(|| self.err("missing '@' before extern name"))?;
        let open = rest
            .find('(')
            .ok_or_else(|| self.err("malformed extern declaration"))?;
        let name = rest[..open].trim();
        if name.is_empty() {
            return Err(self.err("missing extern name"));
        }
        let close = rest
            .rfind(')')
            .ok_or_else(|| self.err("malformed extern declaration"))?;
        let mut params = Vec::new();
        let params_text = rest[open + 1..close].trim();
        if !params_text.is_empty() {
            for tok in split_top_level(params_text) {
                let tok = tok.trim();
                let ty = Type::parse(tok)
                    .ok_or_else(|| self.err(format!("unknown extern parameter type '{}'", tok)))?;
                params.push(ty);
            }
        }
        let tail = rest[close + 1..].trim();
        let ret_text = tail
            .strip_prefix("->")
            .ok_or_else(|| self.err("missing '->' in extern declaration"))?
            .trim();
        let ret_type = Type::parse(ret_text)
            .ok_or_else(|| self.err(format!("unknown extern return type '{}'", ret_text)))?;
        self.module.externs.push(Extern {
            name: name.to_string(),
            ret_type,
            params,
        });
        Ok(())
    }

    fn parse_global(&mut self, line: &str) -> Result<(), Diagnostic> {
        // global [const] <type> @name = <initializer>
        let mut rest = line["global".len()..].trim();
        let mut is_const = false;
        let first = first_word(rest);
        if first == "const" {
            is_const = true;
            rest = rest["const".len()..].trim();
        } else if Type::parse(first).is_none() && !first.starts_with('@') {
            // An unknown word sits where `const` or a type belongs. When a
            // type follows it, the word is a bad qualifier; otherwise the
            // line is missing its `@name` entirely.
            let following = first_word(rest[first.len()..].trim_start());
            if Type::parse(following).is_some() {
                return Err(self.err(format!(
                    "missing 'const' before global type (found '{}')",
                    first
                )));
            }
            return Err(self.err("missing '@' before global name"));
        }

        let ty_tok = first_word(rest);
        if ty_tok.is_empty() || ty_tok.starts_with('@') {
            return Err(self.err("missing global type"));
        }
        let ty = match Type::parse(ty_tok) {
            Some(ty) if ty != Type::Void => ty,
            _ => return Err(self.err(format!("unsupported global type '{}'", ty_tok))),
        };
        rest = rest[ty_tok.len()..].trim();

        let rest = rest
            .strip_prefix('@')
            .ok_or_else(|| self.err("missing '@' before global name"))?;
        let eq = rest
            .find('=')
            .ok_or_else(|| self.err("missing '=' in global definition"))?;
        let name = rest[..eq].trim();
        if name.is_empty() {
            return Err(self.err("missing global name"));
        }
        let init_text = rest[eq + 1..].trim();

        let init = if ty == Type::Str {
            let (value, tail) = self.parse_string_literal(init_text)?;
            if !tail.trim().is_empty() {
                return Err(self.err("unexpected characters after closing '\"'"));
            }
            Value::const_str(value)
        } else {
            self.parse_global_initializer(init_text, ty)?
        };

        self.module.globals.push(Global {
            name: name.to_string(),
            ty,
            is_const,
            init,
        });
        Ok(())
    }

    fn parse_global_initializer(&mut self, text: &str, ty: Type) -> Result<Value, Diagnostic> {
        if text.is_empty() {
            return Err(self.err("missing global initializer"));
        }
        if text == "null" {
            return Ok(Value::NullPtr);
        }
        if let Some(sym) = text.strip_prefix('@') {
            if sym.is_empty() {
                return Err(self.err("missing global name"));
            }
            return Ok(Value::global_addr(sym));
        }
        if ty.is_float() {
            if let Some(f) = parse_float_token(text) {
                return Ok(Value::const_float(f));
            }
        }
        if let Ok(i) = text.parse::<i64>() {
            return Ok(if ty.is_float() {
                Value::const_float(i as f64)
            } else {
                Value::const_int(i)
            });
        }
        Err(self.err(format!("malformed global initializer '{}'", text)))
    }

    /// Parse a `"..."`-quoted literal at the start of `text`. Returns the
    /// decoded value and the remaining tail.
    fn parse_string_literal(&self, text: &str) -> Result<(String, String), Diagnostic> {
        let rest = text
            .strip_prefix('"')
            .ok_or_else(|| self.err("missing opening '\"'"))?;
        let mut body = String::new();
        let mut chars = rest.char_indices();
        let mut escaped = false;
        for (idx, c) in chars.by_ref() {
            if escaped {
                body.push('\\');
                body.push(c);
                escaped = false;
                continue;
            }
            match c {
                '\\' => escaped = true,
                '"' => {
                    let decoded = escape::decode(&body)
                        .map_err(|esc| self.err(format!("unknown escape '{}'", esc)))?;
                    return Ok((decoded, rest[idx + 1..].to_string()));
                }
                c => body.push(c),
            }
        }
        Err(self.err("missing closing '\"'"))
    }

    fn parse_function(&mut self, line: &str) -> Result<(), Diagnostic> {
        // func @name(params) -> ret {
        let header_line = self.line_no();
        let rest = line["func".len()..].trim();
        let rest = rest
            .strip_prefix('@')
            .ok_or_else(|| self.err("missing '@' before function name"))?;
        let open = rest
            .find('(')
            .ok_or_else(|| self.err("malformed function header"))?;
        let name = rest[..open].trim();
        if name.is_empty() {
            return Err(self.err("missing function name"));
        }
        let close = rest
            .rfind(')')
            .ok_or_else(|| self.err("malformed function header"))?;
        let params_text = rest[open + 1..close].trim();
        let tail = rest[close + 1..].trim();
        let arrow = tail
            .strip_prefix("->")
            .ok_or_else(|| self.err("missing '->' in function header"))?
            .trim();
        let before_brace = arrow
            .strip_suffix('{')
            .ok_or_else(|| self.err("missing '{' in function header"))?
            .trim();
        // Optional attribute bracket between the return type and `{`.
        let (ret_text, attrs) = match before_brace.find('[') {
            Some(open) => {
                let close = before_brace
                    .rfind(']')
                    .ok_or_else(|| self.err("malformed attribute list"))?;
                let attrs = before_brace[open + 1..close]
                    .split(',')
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect();
                (before_brace[..open].trim(), attrs)
            }
            None => (before_brace, Vec::new()),
        };
        let ret_type = Type::parse(ret_text)
            .ok_or_else(|| self.err(format!("unknown return type '{}'", ret_text)))?;

        let mut function = Function::new(name, ret_type);
        function.attrs = attrs;
        let mut ctx = FnCtx {
            function,
            scope: HashMap::new(),
        };

        if !params_text.is_empty() {
            for piece in split_top_level(params_text) {
                let piece = piece.trim();
                if piece.is_empty() {
                    return Err(self.err_at(header_line, "missing operand in parameter list"));
                }
                let (pname, pty) = self.parse_typed_param(piece)?;
                let id = ctx.define(&pname, Some(pty));
                ctx.function.params.push(Param {
                    name: pname,
                    ty: pty,
                    id,
                });
            }
        }

        self.parse_function_body(&mut ctx)?;
        self.module.functions.push(ctx.function);
        Ok(())
    }

    /// Parse `%name: type`.
    fn parse_typed_param(&self, text: &str) -> Result<(String, Type), Diagnostic> {
        let text = text
            .strip_prefix('%')
            .ok_or_else(|| self.err(format!("missing '%' in parameter '{}'", text)))?;
        let colon = text
            .find(':')
            .ok_or_else(|| self.err(format!("missing ':' in parameter '%{}'", text)))?;
        let name = text[..colon].trim();
        let ty_tok = text[colon + 1..].trim();
        if name.is_empty() {
            return Err(self.err("missing parameter name"));
        }
        let ty = Type::parse(ty_tok)
            .ok_or_else(|| self.err(format!("unknown parameter type '{}'", ty_tok)))?;
        Ok((name.to_string(), ty))
    }

    fn parse_function_body(&mut self, ctx: &mut FnCtx) -> Result<(), Diagnostic> {
        loop {
            let Some(line) = self.next_content_line() else {
                return Err(self.err("missing '}' at end of function"));
            };
            if line == "}" {
                return Ok(());
            }
            if let Some(header) = block_header(line) {
                self.parse_block_header(ctx, header)?;
                continue;
            }
            if ctx.function.blocks.is_empty() {
                return Err(self.err(format!("expected block label, found: {}", line)));
            }
            let instr = self.parse_instruction(ctx, line)?;
            ctx.function
                .blocks
                .last_mut()
                .expect("block exists")
                .instructions
                .push(instr);
        }
    }

    fn parse_block_header(&mut self, ctx: &mut FnCtx, header: &str) -> Result<(), Diagnostic> {
        // label: | label(%p: ty, ...):
        let (label, params_text) = match header.find('(') {
            Some(open) => {
                let close = header
                    .rfind(')')
                    .ok_or_else(|| self.err("malformed block header"))?;
                (header[..open].trim(), Some(&header[open + 1..close]))
            }
            None => (header.trim(), None),
        };
        if label.is_empty() {
            return Err(self.err("missing block label"));
        }
        let mut block = BasicBlock::new(label);
        if let Some(params_text) = params_text {
            let params_text = params_text.trim();
            if !params_text.is_empty() {
                for piece in split_top_level(params_text) {
                    let (pname, pty) = self.parse_typed_param(piece.trim())?;
                    let id = ctx.define(&pname, Some(pty));
                    block.params.push(Param {
                        name: pname,
                        ty: pty,
                        id,
                    });
                }
            }
        }
        ctx.function.blocks.push(block);
        Ok(())
    }

    fn parse_instruction(&mut self, ctx: &mut FnCtx, line: &str) -> Result<Instr, Diagnostic> {
        let loc = crate::diag::SourceLoc::new(self.line_no(), 1);

        // Optional result: %name[:type] =
        let (result_name, result_ty, rest) = if let Some(after) = line.strip_prefix('%') {
            let stop = after
                .find(|c: char| c.is_whitespace() || c == '=')
                .unwrap_or(after.len());
            let result_tok = &after[..stop];
            let rest = after[stop..].trim_start();
            let rest = rest
                .strip_prefix('=')
                .ok_or_else(|| self.err("missing '=' after instruction result"))?
                .trim_start();
            let (name, ty) = match result_tok.find(':') {
                Some(colon) => {
                    let ty_tok = &result_tok[colon + 1..];
                    let ty = Type::parse(ty_tok)
                        .ok_or_else(|| self.err(format!("unknown result type '{}'", ty_tok)))?;
                    (&result_tok[..colon], Some(ty))
                }
                None => (result_tok, None),
            };
            if name.is_empty() {
                return Err(self.err("missing result name"));
            }
            (Some(name.to_string()), ty, rest)
        } else {
            (None, None, line)
        };

        let op_tok = first_word(rest);
        if op_tok.is_empty() {
            return Err(self.err("missing opcode"));
        }
        let op = Opcode::from_mnemonic(op_tok)
            .ok_or_else(|| self.err(format!("unknown opcode '{}'", op_tok)))?;
        let operand_text = rest[op_tok.len()..].trim();

        let mut instr = Instr::new(op);
        instr.loc = Some(loc);

        match op {
            Opcode::Call => self.parse_call(ctx, operand_text, &mut instr)?,
            Opcode::CallIndirect => self.parse_call_indirect(ctx, operand_text, &mut instr)?,
            Opcode::Br => {
                let target = self.parse_branch_target(ctx, operand_text, "br")?;
                instr.labels.push(target.0);
                instr.br_args.push(target.1);
            }
            Opcode::CBr => self.parse_cbr(ctx, operand_text, &mut instr)?,
            Opcode::SwitchI32 => self.parse_switch(ctx, operand_text, &mut instr)?,
            Opcode::ResumeLabel => {
                let target = self.parse_branch_target(ctx, operand_text, "resume.label")?;
                instr.labels.push(target.0);
                instr.br_args.push(target.1);
            }
            Opcode::Load => {
                // load <type>, <ptr>
                let parts = self.split_operands(operand_text, "load")?;
                if parts.len() != 2 {
                    return Err(self.err("malformed load"));
                }
                instr.ty = Type::parse(parts[0].trim())
                    .ok_or_else(|| self.err(format!("unknown load type '{}'", parts[0].trim())))?;
                instr.operands.push(self.parse_operand(ctx, parts[1].trim())?);
            }
            Opcode::Store => {
                // store <type>, <ptr>, <value>
                let parts = self.split_operands(operand_text, "store")?;
                if parts.len() != 3 {
                    return Err(self.err("malformed store"));
                }
                instr.ty = Type::parse(parts[0].trim())
                    .ok_or_else(|| self.err(format!("unknown store type '{}'", parts[0].trim())))?;
                instr.operands.push(self.parse_operand(ctx, parts[1].trim())?);
                instr.operands.push(self.parse_operand(ctx, parts[2].trim())?);
            }
            Opcode::Ret => {
                if !operand_text.is_empty() {
                    instr.operands.push(self.parse_operand(ctx, operand_text)?);
                }
            }
            Opcode::Trap => {
                if !operand_text.is_empty() {
                    return Err(self.err("trap takes no operands"));
                }
            }
            _ => {
                if !operand_text.is_empty() {
                    for piece in self.split_operands(operand_text, op.mnemonic())? {
                        instr.operands.push(self.parse_operand(ctx, piece.trim())?);
                    }
                }
                if let Some(arity) = op.fixed_arity() {
                    if instr.operands.len() != arity {
                        return Err(self.err(format!(
                            "{} expects {} operand{}",
                            op.mnemonic(),
                            arity,
                            if arity == 1 { "" } else { "s" }
                        )));
                    }
                }
            }
        }

        // Bind the result after operands so an instruction cannot read
        // its own result.
        if let Some(name) = result_name {
            let id = ctx.define(&name, None);
            instr.result = Some(id);
            if let Some(ty) = result_ty {
                instr.ty = ty;
            }
        } else if instr.result.is_none() && op.requires_result() {
            return Err(self.err(format!("missing result for '{}'", op.mnemonic())));
        }

        Ok(instr)
    }

    fn parse_call(
        &mut self,
        ctx: &mut FnCtx,
        text: &str,
        instr: &mut Instr,
    ) -> Result<(), Diagnostic> {
        let rest = text
            .strip_prefix('@')
            .ok_or_else(|| self.err("malformed call: missing '@' before callee"))?;
        let (callee, args_tail) = match rest.find('(') {
            Some(open) => (rest[..open].trim(), Some(&rest[open..])),
            None => (rest.trim(), None),
        };
        if callee.is_empty() {
            return Err(self.err("malformed call: missing callee name"));
        }
        instr.callee = Some(callee.to_string());
        if let Some(args_tail) = args_tail {
            let close = args_tail
                .rfind(')')
                .ok_or_else(|| self.err("malformed call: missing ')'"))?;
            if !args_tail[close + 1..].trim().is_empty() {
                return Err(self.err("malformed call: unexpected trailing characters"));
            }
            let args_text = args_tail[1..close].trim();
            if !args_text.is_empty() {
                for piece in self.split_operands(args_text, "call")? {
                    instr.operands.push(self.parse_operand(ctx, piece.trim())?);
                }
            }
        } else if !text.contains('(') {
            // `call @f junk` without parens
            if text.split_whitespace().count() > 1 {
                return Err(self.err("malformed call: unexpected trailing characters"));
            }
        }
        Ok(())
    }

    fn parse_call_indirect(
        &mut self,
        ctx: &mut FnCtx,
        text: &str,
        instr: &mut Instr,
    ) -> Result<(), Diagnostic> {
        if text.is_empty() {
            return Err(self.err("malformed call: missing call target"));
        }
        let (target_tok, args_tail) = match text.find('(') {
            Some(open) => (text[..open].trim(), Some(&text[open..])),
            None => (text.trim(), None),
        };
        instr.operands.push(self.parse_operand(ctx, target_tok)?);
        if let Some(args_tail) = args_tail {
            let close = args_tail
                .rfind(')')
                .ok_or_else(|| self.err("malformed call: missing ')'"))?;
            if !args_tail[close + 1..].trim().is_empty() {
                return Err(self.err("malformed call: unexpected trailing characters"));
            }
            let args_text = args_tail[1..close].trim();
            if !args_text.is_empty() {
                for piece in self.split_operands(args_text, "call")? {
                    instr.operands.push(self.parse_operand(ctx, piece.trim())?);
                }
            }
        }
        Ok(())
    }

    fn parse_cbr(
        &mut self,
        ctx: &mut FnCtx,
        text: &str,
        instr: &mut Instr,
    ) -> Result<(), Diagnostic> {
        let pieces = self.split_operands(text, "cbr")?;
        if pieces.len() != 3 {
            return Err(self.err("malformed cbr: expected condition and two targets"));
        }
        instr.operands.push(self.parse_operand(ctx, pieces[0].trim())?);
        for target_text in &pieces[1..] {
            let (label, args) = self.parse_branch_target(ctx, target_text.trim(), "cbr")?;
            instr.labels.push(label);
            instr.br_args.push(args);
        }
        Ok(())
    }

    /// `switch.i32 <scrutinee>, <default-target>, <value> -> <target>, ...`
    fn parse_switch(
        &mut self,
        ctx: &mut FnCtx,
        text: &str,
        instr: &mut Instr,
    ) -> Result<(), Diagnostic> {
        let pieces = self.split_operands(text, "switch.i32")?;
        if pieces.len() < 2 {
            return Err(self.err("malformed switch.i32: expected scrutinee and default target"));
        }
        instr.operands.push(self.parse_operand(ctx, pieces[0].trim())?);
        let (default_label, default_args) =
            self.parse_branch_target(ctx, pieces[1].trim(), "switch.i32")?;
        instr.labels.push(default_label);
        instr.br_args.push(default_args);
        for case in &pieces[2..] {
            let case = case.trim();
            let arrow = case
                .find("->")
                .ok_or_else(|| self.err("malformed switch.i32 case: missing '->'"))?;
            let value_tok = case[..arrow].trim();
            let value = self.parse_operand(ctx, value_tok)?;
            if !matches!(value, Value::ConstInt { .. }) {
                return Err(self.err("malformed switch.i32 case: value must be an integer"));
            }
            instr.operands.push(value);
            let (label, args) =
                self.parse_branch_target(ctx, case[arrow + 2..].trim(), "switch.i32")?;
            instr.labels.push(label);
            instr.br_args.push(args);
        }
        Ok(())
    }

    /// `^label(args)` or `label(args)`; bare labels carry no args.
    fn parse_branch_target(
        &mut self,
        ctx: &mut FnCtx,
        text: &str,
        what: &str,
    ) -> Result<(String, Vec<Value>), Diagnostic> {
        let text = text.strip_prefix('^').unwrap_or(text).trim();
        let (label, args_text) = match text.find('(') {
            Some(open) => {
                let close = text
                    .rfind(')')
                    .ok_or_else(|| self.err(format!("malformed {}: missing ')'", what)))?;
                (text[..open].trim(), Some(text[open + 1..close].trim()))
            }
            None => (text, None),
        };
        if label.is_empty() {
            return Err(self.err(format!("malformed branch target in {}: missing label", what)));
        }
        if label.split_whitespace().count() > 1 {
            return Err(self.err(format!("malformed branch target in {}: missing label", what)));
        }
        let mut args = Vec::new();
        if let Some(args_text) = args_text {
            if !args_text.is_empty() {
                for piece in self.split_operands_as(args_text, &format!("malformed {}", what))? {
                    args.push(self.parse_operand(ctx, piece.trim())?);
                }
            }
        }
        Ok((label.to_string(), args))
    }

    /// Comma-split with "missing operand" diagnostics labelled for the
    /// surrounding construct.
    fn split_operands(&self, text: &str, what: &str) -> Result<Vec<String>, Diagnostic> {
        self.split_operands_as(text, &format!("malformed {}", what))
    }

    fn split_operands_as(&self, text: &str, label: &str) -> Result<Vec<String>, Diagnostic> {
        let pieces = split_top_level(text);
        for piece in &pieces {
            if piece.trim().is_empty() {
                return Err(self.err(format!("{}: missing operand", label)));
            }
        }
        Ok(pieces)
    }

    fn parse_operand(&self, ctx: &FnCtx, token: &str) -> Result<Value, Diagnostic> {
        if token.is_empty() {
            return Err(self.err("missing operand"));
        }
        if let Some(name) = token.strip_prefix('%') {
            let id = ctx
                .lookup(name)
                .ok_or_else(|| self.err(format!("unknown temp '%{}'", name)))?;
            return Ok(Value::temp(id));
        }
        if let Some(sym) = token.strip_prefix('@') {
            if sym.is_empty() {
                return Err(self.err("missing global name"));
            }
            return Ok(Value::global_addr(sym));
        }
        match token {
            "true" => return Ok(Value::const_bool(true)),
            "false" => return Ok(Value::const_bool(false)),
            "null" => return Ok(Value::NullPtr),
            _ => {}
        }
        if token.starts_with('"') {
            let (value, tail) = self.parse_string_literal(token)?;
            if !tail.trim().is_empty() {
                return Err(self.err("unexpected characters after closing '\"'"));
            }
            return Ok(Value::const_str(value));
        }
        if let Ok(i) = token.parse::<i64>() {
            return Ok(Value::const_int(i));
        }
        if let Some(f) = parse_float_token(token) {
            return Ok(Value::const_float(f));
        }
        Err(self.err(format!("malformed operand '{}'", token)))
    }
}

/// First whitespace-delimited word of a line.
fn first_word(line: &str) -> &str {
    line.split_whitespace().next().unwrap_or("")
}

/// Whether a line is a block header (`label:` or `label(...):`), as
/// opposed to an instruction. Labels are identifiers possibly containing
/// dots and underscores; the colon must close the header.
fn block_header(line: &str) -> Option<&str> {
    if line.starts_with('%') {
        return None;
    }
    let header = line.strip_suffix(':')?;
    let name_end = header.find('(').unwrap_or(header.len());
    let name = &header[..name_end];
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.')
    {
        return None;
    }
    // `label(...)`: require balanced parens to the end.
    if name_end < header.len() && !header.ends_with(')') {
        return None;
    }
    Some(header)
}

/// Split on commas that are not nested inside parentheses or string
/// quotes. Preserves empty pieces so callers can report missing operands.
fn split_top_level(text: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut current = String::new();
    for c in text.chars() {
        if in_string {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                current.push(c);
            }
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                pieces.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    if !text.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Float literal: requires a decimal point, exponent, or special token so
/// integers keep parsing as integers.
fn parse_float_token(token: &str) -> Option<f64> {
    let lowered = token.to_ascii_lowercase();
    let (sign, body) = match lowered.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, lowered.strip_prefix('+').unwrap_or(&lowered)),
    };
    match body {
        "nan" => return Some(f64::NAN),
        "inf" => return Some(sign * f64::INFINITY),
        _ => {}
    }
    if !token.contains('.') && !lowered.contains('e') {
        return None;
    }
    token.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_top_level_respects_nesting() {
        let pieces = split_top_level("%c, then(%a, 1), else(2)");
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[1].trim(), "then(%a, 1)");
    }

    #[test]
    fn test_split_top_level_keeps_empty_pieces() {
        let pieces = split_top_level("1, , 2");
        assert_eq!(pieces.len(), 3);
        assert!(pieces[1].trim().is_empty());
        let pieces = split_top_level("1, ");
        assert_eq!(pieces.len(), 2);
    }

    #[test]
    fn test_block_header_detection() {
        assert_eq!(block_header("entry:"), Some("entry"));
        assert_eq!(block_header("loop.head(%i: i64):"), Some("loop.head(%i: i64)"));
        assert_eq!(block_header("ret"), None);
        assert_eq!(block_header("%x = iadd 1, 2"), None);
    }

    #[test]
    fn test_float_token() {
        assert_eq!(parse_float_token("3.5"), Some(3.5));
        assert_eq!(parse_float_token("-0.0").map(f64::to_bits), Some((-0.0f64).to_bits()));
        assert!(parse_float_token("NaN").unwrap().is_nan());
        assert_eq!(parse_float_token("+Inf"), Some(f64::INFINITY));
        assert_eq!(parse_float_token("-Inf"), Some(f64::NEG_INFINITY));
        assert_eq!(parse_float_token("42"), None);
    }
}
