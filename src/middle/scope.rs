//! Lexical scopes of a function body being elaborated, together with the flow
//! facts (definite initialization and narrowing) known at the current point.

use std::rc::Rc;

use hashbrown::HashMap;

use crate::{
    frontend::intern::InternedSymbol,
    middle::{tir::LocalId, ty::Type},
};

/// What a flow fact is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowKey {
    Local(LocalId),
    /// A stored property of the receiver, by property index. Only tracked
    /// inside constructors.
    Member(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowFacts {
    pub is_initialized: bool,
    /// `None` means the declared type applies
    pub narrowed: Option<Type>,
}

impl FlowFacts {
    pub fn uninitialized() -> Self {
        Self {
            is_initialized: false,
            narrowed: None,
        }
    }

    pub fn initialized(narrowed: Option<Type>) -> Self {
        Self {
            is_initialized: true,
            narrowed,
        }
    }
}

/// Copy on write map: pushing a scope shares the parent's map until the
/// first write.
pub type FlowMap = Rc<HashMap<FlowKey, FlowFacts>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Holds the parameters
    Function,
    Block,
    /// One arm of an `if` or the right operand of `&&`/`||`
    Branch,
    LoopBody,
}

#[derive(Debug)]
pub struct Scope {
    pub kind: ScopeKind,
    locals_by_name: HashMap<InternedSymbol, LocalId>,
    /// Locals declared directly in this scope, in declaration order
    pub declared: Vec<LocalId>,
    pub flow: FlowMap,
    /// No path reaches the end of the scope. Set by `return`, `break` and
    /// `continue`.
    pub all_paths_return: bool,
}

impl Scope {
    fn new(kind: ScopeKind, flow: FlowMap) -> Self {
        Self {
            kind,
            locals_by_name: HashMap::new(),
            declared: Vec::new(),
            flow,
            all_paths_return: false,
        }
    }
}

#[derive(Debug)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStack {
    /// A stack holding one empty [`ScopeKind::Function`] scope
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::new(ScopeKind::Function, FlowMap::default())],
        }
    }

    fn top(&self) -> &Scope {
        self.scopes
            .last()
            .unwrap_or_else(|| unreachable!("the function scope is never popped"))
    }

    fn top_mut(&mut self) -> &mut Scope {
        self.scopes
            .last_mut()
            .unwrap_or_else(|| unreachable!("the function scope is never popped"))
    }

    pub fn push(&mut self, kind: ScopeKind) {
        let flow = Rc::clone(&self.top().flow);
        self.scopes.push(Scope::new(kind, flow));
    }

    pub fn pop(&mut self) -> Scope {
        assert!(self.scopes.len() > 1, "popped the function scope");

        self.scopes
            .pop()
            .unwrap_or_else(|| unreachable!("checked above"))
    }

    /// Pops a scope whose code always runs to completion when entered, so its
    /// flow continues in the parent
    pub fn pop_into_parent(&mut self) -> Scope {
        let scope = self.pop();
        self.adopt(&scope);
        scope
    }

    /// Continues in the current scope with the flow of an already popped
    /// child scope
    pub fn adopt(&mut self, child: &Scope) {
        let top = self.top_mut();

        top.flow = Rc::clone(&child.flow);
        top.all_paths_return |= child.all_paths_return;
    }

    /// Fails with the previous declaration when `name` is already declared in
    /// the innermost scope
    pub fn declare(
        &mut self,
        name: InternedSymbol,
        local: LocalId,
        facts: FlowFacts,
    ) -> Result<(), LocalId> {
        let top = self.top_mut();

        if let Some(existing) = top.locals_by_name.get(&name) {
            return Err(*existing);
        }

        top.locals_by_name.insert(name, local);
        top.declared.push(local);
        Rc::make_mut(&mut top.flow).insert(FlowKey::Local(local), facts);

        Ok(())
    }

    /// Innermost local named `name`
    pub fn lookup(&self, name: InternedSymbol) -> Option<LocalId> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.locals_by_name.get(&name).copied())
    }

    pub fn facts(&self, key: FlowKey) -> Option<&FlowFacts> {
        self.top().flow.get(&key)
    }

    /// Members without facts are initialized: only constructors track them
    pub fn is_initialized(&self, key: FlowKey) -> bool {
        match key {
            FlowKey::Local(_) => self.facts(key).is_some_and(|f| f.is_initialized),
            FlowKey::Member(_) => self.facts(key).is_none_or(|f| f.is_initialized),
        }
    }

    pub fn narrowed_type(&self, key: FlowKey) -> Option<&Type> {
        self.facts(key).and_then(|f| f.narrowed.as_ref())
    }

    pub fn set_facts(&mut self, key: FlowKey, facts: FlowFacts) {
        Rc::make_mut(&mut self.top_mut().flow).insert(key, facts);
    }

    /// An assignment of a value of type `ty`
    pub fn assign(&mut self, key: FlowKey, ty: Option<Type>) {
        self.set_facts(key, FlowFacts::initialized(ty));
    }

    pub fn narrow(&mut self, key: FlowKey, ty: Type) {
        let is_initialized = self.is_initialized(key);

        self.set_facts(
            key,
            FlowFacts {
                is_initialized,
                narrowed: Some(ty),
            },
        );
    }

    pub fn reset_narrowing(&mut self, key: FlowKey) {
        if self.narrowed_type(key).is_some() {
            let is_initialized = self.is_initialized(key);
            self.set_facts(
                key,
                FlowFacts {
                    is_initialized,
                    narrowed: None,
                },
            );
        }
    }

    pub fn current_flow(&self) -> FlowMap {
        Rc::clone(&self.top().flow)
    }

    pub fn mark_returning(&mut self) {
        self.top_mut().all_paths_return = true;
    }

    pub fn all_paths_return(&self) -> bool {
        self.top().all_paths_return
    }

    pub fn in_loop(&self) -> bool {
        self.scopes.iter().any(|s| s.kind == ScopeKind::LoopBody)
    }

    /// Joins the branches of an `if` into the current scope. `before` is the
    /// flow at the start of the branches. When the branches are not
    /// exhaustive the path skipping all of them joins as well.
    ///
    /// A fact survives the join only when every path reaching it agrees: a
    /// variable is initialized when it is initialized on every path and keeps
    /// a narrowed type when every path narrowed it to the same type.
    pub fn merge_branches(&mut self, before: FlowMap, branches: &[Scope], exhaustive: bool) {
        let mut candidates = branches
            .iter()
            .filter(|s| !s.all_paths_return)
            .map(|s| &s.flow)
            .collect::<Vec<_>>();

        if !exhaustive {
            candidates.push(&before);
        }

        if candidates.is_empty() {
            let top = self.top_mut();
            top.all_paths_return = true;
            top.flow = before;
            return;
        }

        let merged = before
            .keys()
            .map(|key| {
                let facts = candidates
                    .iter()
                    .filter_map(|flow| flow.get(key))
                    .collect::<Vec<_>>();

                let is_initialized = facts.iter().all(|f| f.is_initialized);
                let narrowed = match facts.split_first() {
                    Some((first, rest)) if rest.iter().all(|f| f.narrowed == first.narrowed) => {
                        first.narrowed.clone()
                    }
                    _ => None,
                };

                (
                    *key,
                    FlowFacts {
                        is_initialized,
                        narrowed,
                    },
                )
            })
            .collect();

        self.top_mut().flow = Rc::new(merged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        index::Index,
        middle::{primitive::IntKind, ty::TypeContext},
    };

    fn local(n: usize) -> LocalId {
        LocalId::new(n)
    }

    #[test]
    fn lookup_finds_the_innermost_declaration() {
        let mut scopes = ScopeStack::new();
        let x = InternedSymbol::new("x");

        scopes.declare(x, local(0), FlowFacts::uninitialized()).unwrap();
        scopes.push(ScopeKind::Block);
        scopes.declare(x, local(1), FlowFacts::uninitialized()).unwrap();

        assert_eq!(scopes.lookup(x), Some(local(1)));
        scopes.pop();
        assert_eq!(scopes.lookup(x), Some(local(0)));
    }

    #[test]
    fn duplicate_names_in_one_scope_are_rejected() {
        let mut scopes = ScopeStack::new();
        let x = InternedSymbol::new("x");

        scopes.declare(x, local(0), FlowFacts::uninitialized()).unwrap();
        assert_eq!(
            scopes.declare(x, local(1), FlowFacts::uninitialized()),
            Err(local(0))
        );
    }

    #[test]
    fn child_writes_do_not_leak_into_the_parent() {
        let mut scopes = ScopeStack::new();
        let key = FlowKey::Local(local(0));

        scopes
            .declare(InternedSymbol::new("x"), local(0), FlowFacts::uninitialized())
            .unwrap();
        scopes.push(ScopeKind::Branch);
        scopes.assign(key, None);
        assert!(scopes.is_initialized(key));

        scopes.pop();
        assert!(!scopes.is_initialized(key));
    }

    #[test]
    fn initialization_needs_every_branch() {
        let mut scopes = ScopeStack::new();
        let key = FlowKey::Local(local(0));
        scopes
            .declare(InternedSymbol::new("x"), local(0), FlowFacts::uninitialized())
            .unwrap();
        let before = scopes.current_flow();

        scopes.push(ScopeKind::Branch);
        scopes.assign(key, None);
        let then = scopes.pop();

        scopes.merge_branches(before.clone(), &[then], false);
        assert!(!scopes.is_initialized(key));

        scopes.push(ScopeKind::Branch);
        scopes.assign(key, None);
        let then = scopes.pop();
        scopes.push(ScopeKind::Branch);
        scopes.assign(key, None);
        let otherwise = scopes.pop();

        scopes.merge_branches(before, &[then, otherwise], true);
        assert!(scopes.is_initialized(key));
        assert!(!scopes.all_paths_return());
    }

    #[test]
    fn returning_branches_do_not_join() {
        let mut scopes = ScopeStack::new();
        let key = FlowKey::Local(local(0));
        scopes
            .declare(InternedSymbol::new("x"), local(0), FlowFacts::uninitialized())
            .unwrap();
        let before = scopes.current_flow();

        scopes.push(ScopeKind::Branch);
        scopes.mark_returning();
        let then = scopes.pop();
        scopes.push(ScopeKind::Branch);
        scopes.assign(key, None);
        let otherwise = scopes.pop();

        scopes.merge_branches(before.clone(), &[then], true);
        assert!(scopes.all_paths_return());

        let mut scopes_2 = ScopeStack::new();
        scopes_2
            .declare(InternedSymbol::new("x"), local(0), FlowFacts::uninitialized())
            .unwrap();
        let mut returning = Scope::new(ScopeKind::Branch, before.clone());
        returning.all_paths_return = true;
        scopes_2.merge_branches(before, &[returning, otherwise], true);

        assert!(scopes_2.is_initialized(key));
        assert!(!scopes_2.all_paths_return());
    }

    #[test]
    fn disagreeing_narrowings_fall_back_to_the_declared_type() {
        let mut types = TypeContext::new();
        let i32 = types.int(IntKind::I32);
        let u8 = types.int(IntKind::U8);
        let key = FlowKey::Local(local(0));

        let mut scopes = ScopeStack::new();
        scopes
            .declare(
                InternedSymbol::new("x"),
                local(0),
                FlowFacts::initialized(None),
            )
            .unwrap();
        let before = scopes.current_flow();

        scopes.push(ScopeKind::Branch);
        scopes.narrow(key, i32.clone());
        let then = scopes.pop();
        scopes.push(ScopeKind::Branch);
        scopes.narrow(key, i32.clone());
        let otherwise = scopes.pop();
        scopes.merge_branches(before.clone(), &[then, otherwise], true);
        assert_eq!(scopes.narrowed_type(key), Some(&i32));

        scopes.push(ScopeKind::Branch);
        scopes.narrow(key, u8);
        let then = scopes.pop();
        scopes.merge_branches(before, &[then], false);
        assert_eq!(scopes.narrowed_type(key), None);
    }

    #[test]
    fn untracked_members_count_as_initialized() {
        let mut scopes = ScopeStack::new();

        assert!(scopes.is_initialized(FlowKey::Member(3)));

        scopes.set_facts(FlowKey::Member(3), FlowFacts::uninitialized());
        assert!(!scopes.is_initialized(FlowKey::Member(3)));
    }
}
