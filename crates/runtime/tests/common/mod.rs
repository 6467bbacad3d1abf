//! Shared fixtures for the evaluator and binding suites: a machine with a
//! user context holding a handful of test natives (arithmetic operators,
//! branch constructs, `comment`) plus `true`/`false`.

// Each suite uses a different slice of the fixture.
#![allow(dead_code)]

use mica_core::{
    ActionFlags, ArrayId, Cell, ContextId, ContextType, Kind, ParamClass, ParamSpec, TypeSet,
};
use mica_runtime::{
    BindFlags, Machine, RaiseError, Scanner, Specifier, any_word_types, bind_values_core,
    derive_specifier, eval_array, eval_array_from,
};

pub struct TestEnv {
    pub m: Machine,
    pub ctx: ContextId,
}

/// Install the tracing subscriber once per test binary, honoring
/// `RUST_LOG`; later calls are no-ops.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn int_arg(m: &Machine, fi: usize, slot: u32) -> Result<i64, RaiseError> {
    let cell = m.frame_arg(fi, slot);
    cell.as_integer().ok_or(RaiseError::BadPick {
        kind: cell.heart(),
    })
}

fn add_dispatcher(m: &mut Machine, fi: usize) -> Result<(), RaiseError> {
    let a = int_arg(m, fi, 1)?;
    let b = int_arg(m, fi, 2)?;
    m.frame_mut(fi).out = Cell::integer(a + b);
    Ok(())
}

fn mul_dispatcher(m: &mut Machine, fi: usize) -> Result<(), RaiseError> {
    let a = int_arg(m, fi, 1)?;
    let b = int_arg(m, fi, 2)?;
    m.frame_mut(fi).out = Cell::integer(a * b);
    Ok(())
}

fn sub_dispatcher(m: &mut Machine, fi: usize) -> Result<(), RaiseError> {
    let a = int_arg(m, fi, 1)?;
    let b = int_arg(m, fi, 2)?;
    m.frame_mut(fi).out = Cell::integer(a - b);
    Ok(())
}

fn negate_dispatcher(m: &mut Machine, fi: usize) -> Result<(), RaiseError> {
    let n = int_arg(m, fi, 1)?;
    m.frame_mut(fi).out = Cell::integer(-n);
    Ok(())
}

fn comment_dispatcher(_m: &mut Machine, _fi: usize) -> Result<(), RaiseError> {
    Ok(())
}

fn run_branch(m: &mut Machine, branch: &Cell) -> Result<Cell, RaiseError> {
    if branch.heart() != Kind::Block {
        return Err(RaiseError::BadBranchType {
            kind: branch.heart(),
        });
    }
    let (series, index) = branch.series_parts().expect("block cell");
    let spec = derive_specifier(&mut m.heap, Specifier::Specified, branch)?;
    eval_array_from(m, ArrayId::from_series(series), index, spec)
}

fn if_dispatcher(m: &mut Machine, fi: usize) -> Result<(), RaiseError> {
    let cond = m.frame_arg(fi, 1).clone();
    let branch = m.frame_arg(fi, 2).clone();
    let Some(cond) = cond.as_logic() else {
        return Err(RaiseError::BadBranchType { kind: cond.heart() });
    };
    m.frame_mut(fi).out = if cond {
        let result = run_branch(m, &branch)?;
        if result.is_nulled() || result.is_void() {
            // The branch ran: a heavy null keeps `else` from retriggering.
            Cell::heavy_null()
        } else {
            result
        }
    } else {
        Cell::nulled()
    };
    Ok(())
}

fn else_dispatcher(m: &mut Machine, fi: usize) -> Result<(), RaiseError> {
    let left = m.frame_arg(fi, 1).clone();
    let branch = m.frame_arg(fi, 2).clone();
    m.frame_mut(fi).out = if left.is_nulled() && !left.is_heavy_null() {
        run_branch(m, &branch)?
    } else {
        left
    };
    Ok(())
}

fn then_dispatcher(m: &mut Machine, fi: usize) -> Result<(), RaiseError> {
    let left = m.frame_arg(fi, 1).clone();
    let branch = m.frame_arg(fi, 2).clone();
    m.frame_mut(fi).out = if left.is_nulled() && !left.is_heavy_null() {
        left
    } else {
        run_branch(m, &branch)?
    };
    Ok(())
}

fn recur_dispatcher(m: &mut Machine, fi: usize) -> Result<(), RaiseError> {
    let action = m.frame(fi).original.expect("action frame");
    let body = m.heap.action_body(action).expect("recur has a body");
    let result = eval_array(m, body, Specifier::Specified)?;
    m.frame_mut(fi).out = result;
    Ok(())
}

fn echo_dispatcher(m: &mut Machine, fi: usize) -> Result<(), RaiseError> {
    m.frame_mut(fi).out = m.frame_arg(fi, 1).clone();
    Ok(())
}

/// value, /scale (takes an amount), /flip (bare switch).
fn adjust_dispatcher(m: &mut Machine, fi: usize) -> Result<(), RaiseError> {
    let value = int_arg(m, fi, 1)?;
    let scale = m.frame_arg(fi, 2).as_integer().unwrap_or(1);
    let flip = m.frame_arg(fi, 3).as_logic().unwrap_or(false);
    let mut result = value * scale;
    if flip {
        result = -result;
    }
    m.frame_mut(fi).out = Cell::integer(result);
    Ok(())
}

impl TestEnv {
    pub fn new() -> TestEnv {
        init_tracing();
        let mut m = Machine::default();

        let value = m.heap.intern("value").unwrap();
        let other = m.heap.intern("other").unwrap();
        let branch = m.heap.intern("branch").unwrap();
        let reason = m.heap.intern("reason").unwrap();

        let two_ints = || {
            vec![
                ParamSpec::new(value, ParamClass::Normal),
                ParamSpec::new(other, ParamClass::Normal),
            ]
        };

        let add = {
            let d = m.register_dispatcher(add_dispatcher);
            m.heap
                .make_action(two_ints(), d, ActionFlags::ENFIX, None)
                .unwrap()
        };
        let mul = {
            let d = m.register_dispatcher(mul_dispatcher);
            m.heap
                .make_action(two_ints(), d, ActionFlags::ENFIX, None)
                .unwrap()
        };
        let sub = {
            let d = m.register_dispatcher(sub_dispatcher);
            m.heap
                .make_action(two_ints(), d, ActionFlags::ENFIX, None)
                .unwrap()
        };
        // A right-grouping flavor of subtract, for associativity checks.
        let sub_r = {
            let d = m.register_dispatcher(sub_dispatcher);
            m.heap
                .make_action(
                    two_ints(),
                    d,
                    ActionFlags::ENFIX | ActionFlags::RIGHT_ASSOCIATIVE,
                    None,
                )
                .unwrap()
        };
        let negate = {
            let d = m.register_dispatcher(negate_dispatcher);
            m.heap
                .make_action(
                    vec![ParamSpec::new(value, ParamClass::Normal)],
                    d,
                    ActionFlags::empty(),
                    None,
                )
                .unwrap()
        };
        let comment = {
            let d = m.register_dispatcher(comment_dispatcher);
            m.heap
                .make_action(
                    vec![ParamSpec::new(reason, ParamClass::HardQuote)],
                    d,
                    ActionFlags::INVISIBLE,
                    None,
                )
                .unwrap()
        };
        let if_action = {
            let d = m.register_dispatcher(if_dispatcher);
            m.heap
                .make_action(
                    vec![
                        ParamSpec::new(value, ParamClass::Normal),
                        ParamSpec::new(branch, ParamClass::Normal),
                    ],
                    d,
                    ActionFlags::empty(),
                    None,
                )
                .unwrap()
        };
        let else_action = {
            let d = m.register_dispatcher(else_dispatcher);
            m.heap
                .make_action(
                    vec![
                        ParamSpec::new(value, ParamClass::Normal),
                        ParamSpec::new(branch, ParamClass::Normal),
                    ],
                    d,
                    ActionFlags::ENFIX | ActionFlags::DEFERS_LOOKBACK,
                    None,
                )
                .unwrap()
        };
        let then_action = {
            let d = m.register_dispatcher(then_dispatcher);
            m.heap
                .make_action(
                    vec![
                        ParamSpec::new(value, ParamClass::Normal),
                        ParamSpec::new(branch, ParamClass::Normal),
                    ],
                    d,
                    ActionFlags::ENFIX | ActionFlags::DEFERS_LOOKBACK,
                    None,
                )
                .unwrap()
        };

        let quote = {
            let d = m.register_dispatcher(echo_dispatcher);
            m.heap
                .make_action(
                    vec![ParamSpec::new(value, ParamClass::HardQuote)],
                    d,
                    ActionFlags::empty(),
                    None,
                )
                .unwrap()
        };
        let lit = {
            let d = m.register_dispatcher(echo_dispatcher);
            m.heap
                .make_action(
                    vec![ParamSpec::new(value, ParamClass::SoftQuote)],
                    d,
                    ActionFlags::empty(),
                    None,
                )
                .unwrap()
        };
        let adjust = {
            let d = m.register_dispatcher(adjust_dispatcher);
            let scale = m.heap.intern("scale").unwrap();
            let flip = m.heap.intern("flip").unwrap();
            m.heap
                .make_action(
                    vec![
                        ParamSpec::new(value, ParamClass::Normal),
                        ParamSpec::refinement(scale, ParamClass::Normal),
                        ParamSpec::refinement(flip, ParamClass::Local),
                    ],
                    d,
                    ActionFlags::empty(),
                    None,
                )
                .unwrap()
        };

        let bindings: Vec<(&str, Cell)> = vec![
            ("true", Cell::logic(true)),
            ("false", Cell::logic(false)),
            ("+", Cell::action(add)),
            ("*", Cell::action(mul)),
            ("-", Cell::action(sub)),
            ("--", Cell::action(sub_r)),
            ("negate", Cell::action(negate)),
            ("comment", Cell::action(comment)),
            ("if", Cell::action(if_action)),
            ("else", Cell::action(else_action)),
            ("then", Cell::action(then_action)),
            ("quote", Cell::action(quote)),
            ("lit", Cell::action(lit)),
            ("adjust", Cell::action(adjust)),
        ];
        let keys = bindings
            .iter()
            .map(|(name, _)| m.heap.intern(name).unwrap())
            .collect::<Vec<_>>();
        let ctx = m.heap.make_context(ContextType::Object, keys).unwrap();
        for (slot, (_, cell)) in bindings.into_iter().enumerate() {
            *m.heap.var_mut(ctx, slot as u32 + 1) = cell;
        }

        TestEnv { m, ctx }
    }

    /// An enfix operator whose left is hard-quoted and skippable: it only
    /// accepts an integer left and abandons the lookahead otherwise.
    /// Installed on demand as `?+`.
    pub fn install_maybe_op(&mut self) {
        let d = self.m.register_dispatcher(add_dispatcher);
        let value = self.m.heap.intern("value").unwrap();
        let other = self.m.heap.intern("other").unwrap();
        let left = ParamSpec {
            symbol: value,
            class: ParamClass::HardQuote,
            refinement: false,
            skippable: true,
            accepts: TypeSet::of(&[Kind::Integer]),
        };
        let action = self
            .m
            .heap
            .make_action(
                vec![left, ParamSpec::new(other, ParamClass::Normal)],
                d,
                ActionFlags::ENFIX | ActionFlags::QUOTES_FIRST,
                None,
            )
            .unwrap();
        let name = self.m.heap.intern("?+").unwrap();
        self.m.heap.append_key(self.ctx, name, Cell::action(action));
    }

    /// A recursive action (`recur` evaluates its own body), for stack
    /// depth checks. Installed on demand.
    pub fn install_recur(&mut self) {
        let d = self.m.register_dispatcher(recur_dispatcher);
        let name = self.m.heap.intern("recur").unwrap();
        let body_word = Cell::word(Kind::Word, name);
        let body = self.m.heap.alloc_array(vec![body_word]).unwrap();
        let action = self
            .m
            .heap
            .make_action(vec![], d, ActionFlags::empty(), Some(body))
            .unwrap();
        self.m.heap.append_key(self.ctx, name, Cell::action(action));
        bind_values_core(
            &mut self.m.heap,
            body,
            self.ctx,
            any_word_types(),
            BindFlags::empty(),
            8,
        )
        .unwrap();
    }

    pub fn word(&mut self, name: &str) -> Cell {
        Cell::word(Kind::Word, self.m.heap.intern(name).unwrap())
    }

    pub fn setter(&mut self, name: &str) -> Cell {
        Cell::word(Kind::SetWord, self.m.heap.intern(name).unwrap())
    }

    pub fn block(&mut self, cells: Vec<Cell>) -> Cell {
        let array = self.m.heap.alloc_array(cells).unwrap();
        Cell::series(Kind::Block, array.series(), 0)
    }

    pub fn group(&mut self, cells: Vec<Cell>) -> Cell {
        let array = self.m.heap.alloc_array(cells).unwrap();
        Cell::series(Kind::Group, array.series(), 0)
    }

    /// Bind a source block (deep) against the user context.
    pub fn bind(&mut self, cells: Vec<Cell>) -> ArrayId {
        let array = self.m.heap.alloc_array(cells).unwrap();
        bind_values_core(
            &mut self.m.heap,
            array,
            self.ctx,
            any_word_types(),
            BindFlags::DEEP,
            32,
        )
        .unwrap();
        array
    }

    /// Bind and evaluate a source block.
    pub fn eval(&mut self, cells: Vec<Cell>) -> Result<Cell, RaiseError> {
        let array = self.bind(cells);
        eval_array(&mut self.m, array, Specifier::Specified)
    }
}

/// Fixture scanner: whitespace-separated integers and words, binding
/// words through the lent binder when a context is supplied.
pub struct IntWordScanner;

impl Scanner for IntWordScanner {
    fn scan(
        &mut self,
        heap: &mut mica_core::Heap,
        text: &str,
        binder: Option<(&mut mica_runtime::Binder, ContextId)>,
    ) -> Result<Vec<Cell>, RaiseError> {
        let mut cells = Vec::new();
        for token in text.split_whitespace() {
            if let Ok(n) = token.parse::<i64>() {
                cells.push(Cell::integer(n));
            } else {
                let symbol = heap.intern(token)?;
                let mut cell = Cell::word(Kind::Word, symbol);
                if let Some((binder, context)) = binder.as_ref().map(|(b, c)| (&**b, *c)) {
                    let index = binder.get_else_zero(heap, symbol);
                    if index != 0 {
                        cell = Cell::bound_word(Kind::Word, symbol, context, index);
                    }
                }
                cells.push(cell);
            }
        }
        Ok(cells)
    }
}
