//! Structured control flow produced by [`crate::structurize`].
//!
//! A [`Shape`] nests opaque block bodies inside sequences, conditionals and loops. Control leaves
//! a construct only by falling off its end or by [`Shape::Br`] to the label of an enclosing
//! `Block` (continue after it) or `Loop` (jump back to its start), the same model as WebAssembly
//! structured control flow.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LabelId(pub u32);

/// Condition guarding an [`Shape::If`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Test<C> {
    Cond(C),
    /// The dispatch variable equals the given block id.
    DispatchIs(u32),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Shape<B, C> {
    Seq(Vec<Shape<B, C>>),
    Body(B),
    Block {
        label: LabelId,
        body: Box<Shape<B, C>>,
    },
    Loop {
        label: LabelId,
        body: Box<Shape<B, C>>,
    },
    If {
        test: Test<C>,
        then: Box<Shape<B, C>>,
        otherwise: Box<Shape<B, C>>,
    },
    Br(LabelId),
    SetDispatch(u32),
}

impl<B, C> Shape<B, C> {
    /// Sequence constructor that flattens nested sequences and unwraps singletons.
    pub fn seq(items: Vec<Shape<B, C>>) -> Self {
        let mut flat = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Shape::Seq(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            if let Some(only) = flat.pop() {
                return only;
            }
        }
        Shape::Seq(flat)
    }

    pub fn empty() -> Self {
        Shape::Seq(Vec::new())
    }

    pub fn for_each_body(&self, f: &mut impl FnMut(&B)) {
        match self {
            Shape::Seq(items) => {
                for item in items {
                    item.for_each_body(f);
                }
            }
            Shape::Body(body) => f(body),
            Shape::Block { body, .. } | Shape::Loop { body, .. } => body.for_each_body(f),
            Shape::If {
                then, otherwise, ..
            } => {
                then.for_each_body(f);
                otherwise.for_each_body(f);
            }
            Shape::Br(_) | Shape::SetDispatch(_) => {}
        }
    }

    /// Whether any node reads or writes the dispatch variable.
    pub fn uses_dispatch(&self) -> bool {
        match self {
            Shape::Seq(items) => items.iter().any(Shape::uses_dispatch),
            Shape::Body(_) | Shape::Br(_) => false,
            Shape::Block { body, .. } | Shape::Loop { body, .. } => body.uses_dispatch(),
            Shape::If {
                test,
                then,
                otherwise,
            } => {
                matches!(test, Test::DispatchIs(_))
                    || then.uses_dispatch()
                    || otherwise.uses_dispatch()
            }
            Shape::SetDispatch(_) => true,
        }
    }
}

/// Callbacks used by [`walk`] to run a shape.
pub trait Visitor<B, C> {
    type Error;

    /// Run a block body. `Some(value)` means the body returned from the function.
    fn body(&mut self, body: &B) -> Result<Option<u64>, Self::Error>;

    fn test(&mut self, cond: &C) -> Result<bool, Self::Error>;

    /// Called every time a loop is re-entered through its continue label.
    fn back_edge(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

enum Flow {
    Next,
    Break(LabelId),
    Return(u64),
}

struct Walk<'v, V> {
    visitor: &'v mut V,
    dispatch: u32,
}

impl<V> Walk<'_, V> {
    fn run<B, C>(&mut self, shape: &Shape<B, C>) -> Result<Flow, V::Error>
    where
        V: Visitor<B, C>,
    {
        match shape {
            Shape::Seq(items) => {
                for item in items {
                    match self.run(item)? {
                        Flow::Next => {}
                        other => return Ok(other),
                    }
                }
                Ok(Flow::Next)
            }
            Shape::Body(body) => Ok(match self.visitor.body(body)? {
                Some(value) => Flow::Return(value),
                None => Flow::Next,
            }),
            Shape::Block { label, body } => match self.run(body)? {
                Flow::Break(target) if target == *label => Ok(Flow::Next),
                other => Ok(other),
            },
            Shape::Loop { label, body } => loop {
                match self.run(body)? {
                    Flow::Break(target) if target == *label => {
                        <V as Visitor<B, C>>::back_edge(self.visitor)?
                    }
                    other => return Ok(other),
                }
            },
            Shape::If {
                test,
                then,
                otherwise,
            } => {
                let taken = match test {
                    Test::Cond(cond) => self.visitor.test(cond)?,
                    Test::DispatchIs(id) => self.dispatch == *id,
                };
                self.run(if taken { then } else { otherwise })
            }
            Shape::Br(label) => Ok(Flow::Break(*label)),
            Shape::SetDispatch(id) => {
                self.dispatch = *id;
                Ok(Flow::Next)
            }
        }
    }
}

/// Execute `shape`, returning the value of the body that returned, or `None` if control fell
/// off the end.
pub fn walk<B, C, V: Visitor<B, C>>(
    shape: &Shape<B, C>,
    visitor: &mut V,
) -> Result<Option<u64>, V::Error> {
    let mut walk = Walk {
        visitor,
        dispatch: 0,
    };
    Ok(match walk.run(shape)? {
        Flow::Return(value) => Some(value),
        Flow::Next | Flow::Break(_) => None,
    })
}
