//! Variable slot addressing.
//!
//! A compilation unit has a fixed number of argument slots and local slots.
//! [`Operand`] names one of them; [`Operands`] is the indexed collection the
//! analysis uses for state snapshots, per-slot defining nodes, and OSR
//! must-handle values alike.

/// Address of one variable slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Operand {
    /// Function argument `i`.
    Argument(u32),
    /// Local variable `i`.
    Local(u32),
}

/// Fixed-size per-slot storage: one `T` per argument and one per local.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Operands<T> {
    arguments: Vec<T>,
    locals: Vec<T>,
}

impl<T: Default + Clone> Operands<T> {
    /// Default-filled storage for the given slot counts.
    pub fn new(num_arguments: usize, num_locals: usize) -> Self {
        Operands {
            arguments: vec![T::default(); num_arguments],
            locals: vec![T::default(); num_locals],
        }
    }

    #[inline]
    pub fn num_arguments(&self) -> usize {
        self.arguments.len()
    }

    #[inline]
    pub fn num_locals(&self) -> usize {
        self.locals.len()
    }

    #[inline]
    pub fn argument(&self, index: usize) -> &T {
        &self.arguments[index]
    }

    #[inline]
    pub fn argument_mut(&mut self, index: usize) -> &mut T {
        &mut self.arguments[index]
    }

    #[inline]
    pub fn local(&self, index: usize) -> &T {
        &self.locals[index]
    }

    #[inline]
    pub fn local_mut(&mut self, index: usize) -> &mut T {
        &mut self.locals[index]
    }

    #[inline]
    pub fn get(&self, operand: Operand) -> &T {
        match operand {
            Operand::Argument(i) => &self.arguments[i as usize],
            Operand::Local(i) => &self.locals[i as usize],
        }
    }

    #[inline]
    pub fn get_mut(&mut self, operand: Operand) -> &mut T {
        match operand {
            Operand::Argument(i) => &mut self.arguments[i as usize],
            Operand::Local(i) => &mut self.locals[i as usize],
        }
    }

    /// Whether `operand` addresses a slot that exists in this layout.
    pub fn is_in_bounds(&self, operand: Operand) -> bool {
        match operand {
            Operand::Argument(i) => (i as usize) < self.arguments.len(),
            Operand::Local(i) => (i as usize) < self.locals.len(),
        }
    }

    /// All slots, arguments first.
    pub fn operands(&self) -> impl Iterator<Item = Operand> {
        let args = (0..self.arguments.len() as u32).map(Operand::Argument);
        let locals = (0..self.locals.len() as u32).map(Operand::Local);
        args.chain(locals)
    }

    /// All slots with their values, arguments first.
    pub fn iter(&self) -> impl Iterator<Item = (Operand, &T)> {
        let args = self
            .arguments
            .iter()
            .enumerate()
            .map(|(i, v)| (Operand::Argument(i as u32), v));
        let locals = self
            .locals
            .iter()
            .enumerate()
            .map(|(i, v)| (Operand::Local(i as u32), v));
        args.chain(locals)
    }

    /// Mutable visit of every slot.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(Operand, &mut T)) {
        for (i, v) in self.arguments.iter_mut().enumerate() {
            f(Operand::Argument(i as u32), v);
        }
        for (i, v) in self.locals.iter_mut().enumerate() {
            f(Operand::Local(i as u32), v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addressing_and_iteration() {
        let mut ops: Operands<i32> = Operands::new(2, 3);
        *ops.get_mut(Operand::Argument(1)) = 10;
        *ops.get_mut(Operand::Local(2)) = 20;

        assert_eq!(*ops.argument(1), 10);
        assert_eq!(*ops.local(2), 20);
        assert_eq!(*ops.get(Operand::Local(0)), 0);

        let all: Vec<Operand> = ops.operands().collect();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0], Operand::Argument(0));
        assert_eq!(all[2], Operand::Local(0));
    }

    #[test]
    fn bounds_check() {
        let ops: Operands<i32> = Operands::new(1, 1);
        assert!(ops.is_in_bounds(Operand::Argument(0)));
        assert!(!ops.is_in_bounds(Operand::Argument(1)));
        assert!(!ops.is_in_bounds(Operand::Local(5)));
    }
}
