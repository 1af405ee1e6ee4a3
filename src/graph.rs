//! Expression graphs: the mutable node/edge representation of symbolic
//! expressions.
//!
//! An [`ExpressionGraph`] is an acyclic directed graph whose nodes are
//! either operators or leaves, with a designated head node as the result.
//! Nodes are identified by positional indices that are stable only within
//! one graph instance; merging graph B into graph A renumbers B's indices.
//!
//! Construction follows two rules:
//!
//! - leaves are deduplicated by equality lookup against the existing nodes
//! - operator nodes are never deduplicated, even when structurally
//!   identical to another application (no common-subexpression
//!   elimination; operators are stateless, repeat applications are
//!   deliberate distinct nodes)
//!
//! Graphs support shape inference, free-symbol extraction, temporal
//! classification and direct (partial) numeric evaluation. Graphs are
//! assumed acyclic; recursive traversal of a cyclic graph diverges.
//!
//! Infix operator sugar is intentionally absent: expressions are built with
//! the explicit builder functions [`add`], [`sub`], [`mul`], [`div`],
//! [`neg`], [`pow`], [`matmul`] and [`transpose`], or through
//! [`Context::apply`](crate::context::Context::apply) for extension
//! operators.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use colored::Colorize;
use itertools::Itertools;
use ndarray::{Array1, Array2};

use crate::context::Context;
use crate::errors::{EvalError, ShapeError};
use crate::ops::Op;
use crate::shape::Shape;
use crate::symbols::{Leaf, Parameter, SignalReference, Variable};
use crate::value::Value;

/// An entry in a graph's node list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Node {
    /// An operator application; its children live in the edge map
    Op(Op),
    /// A childless leaf
    Leaf(Leaf),
}

/// A symbolic term: either a full graph or a bare leaf.
///
/// This is the argument and result currency of the builder API. Embedded
/// numeric constants are leaves ([`Leaf::Constant`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Algebraic {
    Graph(ExpressionGraph),
    Leaf(Leaf),
}

impl Algebraic {
    /// A constant term wrapping a numeric value.
    pub fn constant(value: impl Into<Value>) -> Self {
        Algebraic::Leaf(Leaf::Constant(value.into()))
    }

    /// The numeric value, if this term is a constant leaf.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Algebraic::Leaf(Leaf::Constant(v)) => Some(v),
            _ => None,
        }
    }

    /// Shape of this term.
    pub fn shape(&self, ctx: &Context) -> Result<Shape, ShapeError> {
        match self {
            Algebraic::Graph(g) => g.shape(ctx),
            Algebraic::Leaf(leaf) => Ok(leaf.shape()),
        }
    }

    /// Free symbols of this term.
    pub fn symbols(&self, ctx: &Context) -> HashSet<Leaf> {
        match self {
            Algebraic::Graph(g) => g.symbols(ctx),
            Algebraic::Leaf(leaf) => leaf.symbols(ctx.time()),
        }
    }

    /// Whether this term's value depends on time.
    pub fn is_temporal(&self, ctx: &Context) -> bool {
        match self {
            Algebraic::Graph(g) => g.is_temporal(ctx),
            Algebraic::Leaf(leaf) => leaf.is_temporal(ctx.time()),
        }
    }
}

impl From<ExpressionGraph> for Algebraic {
    fn from(g: ExpressionGraph) -> Self {
        Algebraic::Graph(g)
    }
}

impl From<Leaf> for Algebraic {
    fn from(leaf: Leaf) -> Self {
        Algebraic::Leaf(leaf)
    }
}

impl From<Variable> for Algebraic {
    fn from(v: Variable) -> Self {
        Algebraic::Leaf(Leaf::Variable(v))
    }
}

impl From<&Variable> for Algebraic {
    fn from(v: &Variable) -> Self {
        Algebraic::Leaf(Leaf::Variable(v.clone()))
    }
}

impl From<Parameter> for Algebraic {
    fn from(p: Parameter) -> Self {
        Algebraic::Leaf(Leaf::Parameter(p))
    }
}

impl From<&Parameter> for Algebraic {
    fn from(p: &Parameter) -> Self {
        Algebraic::Leaf(Leaf::Parameter(p.clone()))
    }
}

impl From<SignalReference> for Algebraic {
    fn from(s: SignalReference) -> Self {
        Algebraic::Leaf(Leaf::Signal(s))
    }
}

impl From<&SignalReference> for Algebraic {
    fn from(s: &SignalReference) -> Self {
        Algebraic::Leaf(Leaf::Signal(s.clone()))
    }
}

impl From<Value> for Algebraic {
    fn from(v: Value) -> Self {
        Algebraic::Leaf(Leaf::Constant(v))
    }
}

impl From<f64> for Algebraic {
    fn from(x: f64) -> Self {
        Algebraic::constant(x)
    }
}

impl From<Array1<f64>> for Algebraic {
    fn from(v: Array1<f64>) -> Self {
        Algebraic::constant(v)
    }
}

impl From<Array2<f64>> for Algebraic {
    fn from(m: Array2<f64>) -> Self {
        Algebraic::constant(m)
    }
}

/// Callable sampling a signal at a numeric time.
pub type SignalFn = Arc<dyn Fn(f64) -> Value>;

/// Leaf-to-value bindings for direct graph evaluation.
///
/// Signals bind to a callable of time rather than a fixed value; the
/// `EvaluateSignal` operator samples the callable when its time argument
/// evaluates to a scalar.
#[derive(Default, Clone)]
pub struct Bindings {
    values: HashMap<Leaf, Value>,
    signals: HashMap<Leaf, SignalFn>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a leaf to a numeric value.
    pub fn bind(&mut self, leaf: impl Into<Leaf>, value: impl Into<Value>) -> &mut Self {
        self.values.insert(leaf.into(), value.into());
        self
    }

    /// Binds a signal reference to a callable of time.
    pub fn bind_signal(
        &mut self,
        signal: SignalReference,
        f: impl Fn(f64) -> Value + 'static,
    ) -> &mut Self {
        self.signals.insert(Leaf::Signal(signal), Arc::new(f));
        self
    }

    fn value(&self, leaf: &Leaf) -> Option<&Value> {
        self.values.get(leaf)
    }

    fn signal_fn(&self, leaf: &Leaf) -> Option<&SignalFn> {
        self.signals.get(leaf)
    }
}

/// Graph representation of a symbolic expression.
#[derive(Clone)]
pub struct ExpressionGraph {
    nodes: Vec<Node>,
    edges: HashMap<usize, Vec<usize>>,
    head: usize,
}

impl ExpressionGraph {
    /// Creates a graph whose head is a fresh operator node over `args`.
    ///
    /// Arguments that are themselves graphs are merged in (their node
    /// indices remapped, their edge maps unioned) rather than nested.
    pub fn new(op: Op, args: Vec<Algebraic>) -> Self {
        let mut graph = Self {
            nodes: Vec::new(),
            edges: HashMap::new(),
            head: 0,
        };
        let children: Vec<usize> = args
            .into_iter()
            .map(|arg| graph.add_algebraic(arg))
            .collect();
        let op_node = graph.append_node(Node::Op(op));
        graph.edges.insert(op_node, children);
        graph.head = op_node;
        graph
    }

    /// The node index designated as this graph's result.
    pub fn head(&self) -> usize {
        self.head
    }

    /// Number of nodes currently in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Consumes the graph and returns it grown by one operator node over
    /// `[old head, trailing...]`, with the head reassigned to the new node.
    pub fn push_op(mut self, op: Op, trailing: Vec<Algebraic>) -> Self {
        let mut children = vec![self.head];
        for arg in trailing {
            children.push(self.add_algebraic(arg));
        }
        let op_node = self.append_node(Node::Op(op));
        self.edges.insert(op_node, children);
        self.head = op_node;
        self
    }

    /// Inserts a term into the node list, returning its index.
    ///
    /// Leaves are deduplicated by equality; graphs are merged; operator
    /// nodes inside merged graphs are always fresh structure.
    pub fn add_or_get_node(&mut self, value: Algebraic) -> usize {
        self.add_algebraic(value)
    }

    fn add_algebraic(&mut self, value: Algebraic) -> usize {
        match value {
            Algebraic::Graph(other) => self.merge_and_return_subgraph_head(other),
            Algebraic::Leaf(leaf) => self.add_or_get_leaf(leaf),
        }
    }

    fn add_or_get_leaf(&mut self, leaf: Leaf) -> usize {
        if let Some(idx) = self
            .nodes
            .iter()
            .position(|node| matches!(node, Node::Leaf(existing) if *existing == leaf))
        {
            return idx;
        }
        self.append_node(Node::Leaf(leaf))
    }

    fn append_node(&mut self, node: Node) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(node);
        idx
    }

    /// Splices another graph into this one, remapping every index and
    /// unioning the edge maps. Returns the remapped head of the subgraph.
    fn merge_and_return_subgraph_head(&mut self, other: ExpressionGraph) -> usize {
        let mut new_indices = HashMap::with_capacity(other.nodes.len());
        for (old_idx, node) in other.nodes.into_iter().enumerate() {
            let new_idx = match node {
                Node::Op(op) => self.append_node(Node::Op(op)),
                Node::Leaf(leaf) => self.add_or_get_leaf(leaf),
            };
            new_indices.insert(old_idx, new_idx);
        }
        for (parent, children) in other.edges {
            self.edges.insert(
                new_indices[&parent],
                children.iter().map(|child| new_indices[child]).collect(),
            );
        }
        new_indices[&other.head]
    }

    pub(crate) fn node_at(&self, node: usize) -> &Node {
        &self.nodes[node]
    }

    pub(crate) fn children(&self, node: usize) -> &[usize] {
        self.edges.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The shape of this graph's result, inferred recursively through each
    /// operator's shape rule.
    pub fn shape(&self, ctx: &Context) -> Result<Shape, ShapeError> {
        self.shape_of(self.head, ctx)
    }

    fn shape_of(&self, node: usize, ctx: &Context) -> Result<Shape, ShapeError> {
        match &self.nodes[node] {
            Node::Leaf(leaf) => Ok(leaf.shape()),
            Node::Op(op) => {
                let child_shapes: Vec<Shape> = self
                    .children(node)
                    .iter()
                    .map(|child| self.shape_of(*child, ctx))
                    .collect::<Result<_, _>>()?;
                ctx.ops().infer_shape(*op, &child_shapes)
            }
        }
    }

    /// Evaluates the graph against the given bindings.
    ///
    /// Bound leaves substitute their value; unbound leaves pass through
    /// unchanged, so a partially bound graph evaluates to a residual
    /// symbolic term rather than an error. A fully numeric application
    /// folds to a constant.
    pub fn call(&self, ctx: &Context, bindings: &Bindings) -> Result<Algebraic, EvalError> {
        self.eval_node(self.head, ctx, bindings)
    }

    /// Evaluates the graph and requires a fully numeric result.
    ///
    /// # Errors
    /// [`EvalError::UnresolvedSymbol`] if free symbols remain after
    /// substitution.
    pub fn eval(&self, ctx: &Context, bindings: &Bindings) -> Result<Value, EvalError> {
        match self.call(ctx, bindings)? {
            Algebraic::Leaf(Leaf::Constant(value)) => Ok(value),
            residual => {
                let free = residual
                    .symbols(ctx)
                    .into_iter()
                    .map(|leaf| leaf.to_string())
                    .sorted()
                    .join(", ");
                Err(EvalError::UnresolvedSymbol(free))
            }
        }
    }

    fn eval_node(
        &self,
        node: usize,
        ctx: &Context,
        bindings: &Bindings,
    ) -> Result<Algebraic, EvalError> {
        match &self.nodes[node] {
            Node::Leaf(Leaf::Constant(value)) => Ok(Algebraic::constant(value.clone())),
            Node::Leaf(leaf) => match bindings.value(leaf) {
                Some(value) => Ok(Algebraic::constant(value.clone())),
                None => Ok(Algebraic::Leaf(leaf.clone())),
            },
            Node::Op(op) => {
                if *op == Op::EvaluateSignal {
                    if let [sig_idx, t_idx] = *self.children(node) {
                        return self.eval_signal(sig_idx, t_idx, ctx, bindings);
                    }
                }
                let children: Vec<Algebraic> = self
                    .children(node)
                    .iter()
                    .map(|child| self.eval_node(*child, ctx, bindings))
                    .collect::<Result<_, _>>()?;
                match all_values(&children) {
                    Some(values) => Ok(Algebraic::constant(ctx.ops().eval(*op, &values)?)),
                    None => Ok(Algebraic::Graph(ExpressionGraph::new(*op, children))),
                }
            }
        }
    }

    /// Samples a bound signal at a numeric time; otherwise rebuilds the
    /// application as a residual graph.
    fn eval_signal(
        &self,
        sig_idx: usize,
        t_idx: usize,
        ctx: &Context,
        bindings: &Bindings,
    ) -> Result<Algebraic, EvalError> {
        let t_val = self.eval_node(t_idx, ctx, bindings)?;
        if let Node::Leaf(sig_leaf @ Leaf::Signal(_)) = &self.nodes[sig_idx] {
            if let (Some(f), Some(t)) = (
                bindings.signal_fn(sig_leaf),
                t_val.as_value().and_then(Value::as_scalar),
            ) {
                return Ok(Algebraic::constant(f(t)));
            }
        }
        let sig_val = self.eval_node(sig_idx, ctx, bindings)?;
        Ok(Algebraic::Graph(ExpressionGraph::new(
            Op::EvaluateSignal,
            vec![sig_val, t_val],
        )))
    }

    /// The set of free symbols reachable from the head.
    ///
    /// A subtree rooted at `EvaluateSignal` contributes the union of its
    /// children's symbol sets minus the time variable: time has been
    /// consumed by the application, it is no longer free there. A bare,
    /// unapplied signal leaf contributes both itself and the time variable.
    /// This asymmetry also applies to nested signal-of-signal
    /// applications.
    pub fn symbols(&self, ctx: &Context) -> HashSet<Leaf> {
        self.symbols_of(self.head, ctx)
    }

    fn symbols_of(&self, node: usize, ctx: &Context) -> HashSet<Leaf> {
        match &self.nodes[node] {
            Node::Leaf(leaf) => leaf.symbols(ctx.time()),
            Node::Op(op) => {
                let mut set = HashSet::new();
                for child in self.children(node) {
                    set.extend(self.symbols_of(*child, ctx));
                }
                if *op == Op::EvaluateSignal {
                    set.remove(&Leaf::Variable(ctx.time().clone()));
                }
                set
            }
        }
    }

    /// Whether this graph's value depends on time.
    ///
    /// A subtree is constant iff every leaf in it is non-temporal, except
    /// that a subtree rooted at `EvaluateSignal` is constant whenever the
    /// sampling point is anything other than the running time variable:
    /// sampling a signal at a fixed point removes the time-dependence of
    /// the value, even though the signal leaf itself remains temporal in
    /// isolation. A signal applied at the time variable itself still
    /// tracks time.
    pub fn is_temporal(&self, ctx: &Context) -> bool {
        !self.subtree_constant(self.head, ctx)
    }

    fn subtree_constant(&self, node: usize, ctx: &Context) -> bool {
        match &self.nodes[node] {
            Node::Leaf(leaf) => !leaf.is_temporal(ctx.time()),
            Node::Op(Op::EvaluateSignal) => !self.sampled_at_time_variable(node, ctx),
            Node::Op(_) => self
                .children(node)
                .iter()
                .all(|child| self.subtree_constant(*child, ctx)),
        }
    }

    fn sampled_at_time_variable(&self, node: usize, ctx: &Context) -> bool {
        matches!(
            self.children(node).get(1).map(|idx| &self.nodes[*idx]),
            Some(Node::Leaf(Leaf::Variable(v))) if v == ctx.time()
        )
    }

    fn fmt_node(&self, node: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.nodes[node] {
            Node::Leaf(leaf) => write!(f, "{leaf}"),
            Node::Op(op) => {
                write!(f, "{op:?}(")?;
                for (i, child) in self.children(node).iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    self.fmt_node(*child, f)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Structural equality: same nodes, same edges, same head. Two graphs that
/// are structurally identical up to node ordering are not guaranteed to
/// compare equal.
impl PartialEq for ExpressionGraph {
    fn eq(&self, other: &Self) -> bool {
        self.head == other.head && self.nodes == other.nodes && self.edges == other.edges
    }
}

impl Eq for ExpressionGraph {}

/// Structural hash over the node list, the (sorted) edge map and the head,
/// sufficient for use as a memoization key.
impl Hash for ExpressionGraph {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.nodes.hash(state);
        for parent in self.edges.keys().sorted() {
            parent.hash(state);
            self.edges[parent].hash(state);
        }
        self.head.hash(state);
    }
}

impl fmt::Display for ExpressionGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_node(self.head, f)
    }
}

impl fmt::Debug for ExpressionGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{{")?;
        writeln!(f, "    {}: {}", "Expression".cyan(), self)?;
        writeln!(f, "    {}: {:?}", "Nodes".cyan(), self.nodes)?;
        writeln!(f, "    {}: {:?}", "Edges".cyan(), self.edges)?;
        writeln!(f, "    {}: {}", "Head".cyan(), self.head)?;
        write!(f, "}}")
    }
}

/// Builds `lhs + rhs`.
///
/// If the left-hand side is already a graph it grows in place; otherwise a
/// fresh graph is created and graph arguments are merged in.
pub fn add(lhs: impl Into<Algebraic>, rhs: impl Into<Algebraic>) -> ExpressionGraph {
    binary(Op::Add, lhs.into(), rhs.into())
}

/// Builds `lhs - rhs`.
pub fn sub(lhs: impl Into<Algebraic>, rhs: impl Into<Algebraic>) -> ExpressionGraph {
    binary(Op::Sub, lhs.into(), rhs.into())
}

/// Builds `lhs * rhs` (elementwise with scalar broadcast).
pub fn mul(lhs: impl Into<Algebraic>, rhs: impl Into<Algebraic>) -> ExpressionGraph {
    binary(Op::Mul, lhs.into(), rhs.into())
}

/// Builds `lhs / rhs`.
pub fn div(lhs: impl Into<Algebraic>, rhs: impl Into<Algebraic>) -> ExpressionGraph {
    binary(Op::Div, lhs.into(), rhs.into())
}

/// Builds `base ^ exponent`.
pub fn pow(base: impl Into<Algebraic>, exponent: impl Into<Algebraic>) -> ExpressionGraph {
    binary(Op::Pow, base.into(), exponent.into())
}

/// Builds the matrix product `lhs @ rhs`.
pub fn matmul(lhs: impl Into<Algebraic>, rhs: impl Into<Algebraic>) -> ExpressionGraph {
    binary(Op::MatMul, lhs.into(), rhs.into())
}

/// Builds `-arg`.
pub fn neg(arg: impl Into<Algebraic>) -> ExpressionGraph {
    unary(Op::Neg, arg.into())
}

/// Builds the transpose of a matrix term.
pub fn transpose(arg: impl Into<Algebraic>) -> ExpressionGraph {
    unary(Op::Transpose, arg.into())
}

/// Numeric values of every term, or `None` if any term is still symbolic.
fn all_values(children: &[Algebraic]) -> Option<Vec<Value>> {
    children.iter().map(|child| child.as_value().cloned()).collect()
}

fn binary(op: Op, lhs: Algebraic, rhs: Algebraic) -> ExpressionGraph {
    match lhs {
        Algebraic::Graph(graph) => graph.push_op(op, vec![rhs]),
        leaf => ExpressionGraph::new(op, vec![leaf, rhs]),
    }
}

fn unary(op: Op, arg: Algebraic) -> ExpressionGraph {
    match arg {
        Algebraic::Graph(graph) => graph.push_op(op, vec![]),
        leaf => ExpressionGraph::new(op, vec![leaf]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::Port;
    use ndarray::arr2;

    struct WidePort(usize);

    impl Port for WidePort {
        fn len(&self) -> usize {
            self.0
        }
    }

    fn signal(ctx: &mut Context, len: usize) -> SignalReference {
        let port = ctx.insert_port(Box::new(WidePort(len)));
        ctx.signal(port).unwrap()
    }

    #[test]
    fn test_functional_equivalence() {
        // Graph(add, a, b).eval({a: 2, b: 3}) == 2 + 3
        let mut ctx = Context::new();
        let a = ctx.variable("a");
        let b = ctx.variable("b");

        let graph = add(&a, &b);
        let mut bindings = Bindings::new();
        bindings.bind(a, 2.0).bind(b, 3.0);

        assert_eq!(graph.eval(&ctx, &bindings).unwrap(), Value::Scalar(5.0));
    }

    #[test]
    fn test_leaf_dedup_idempotence() {
        let mut ctx = Context::new();
        let x = ctx.variable("x");

        // x * x: the leaf is inserted once, the op node once
        let graph = mul(&x, &x);
        assert_eq!(graph.node_count(), 2);

        let mut graph = graph;
        let first = graph.add_or_get_node(Algebraic::from(&x));
        let second = graph.add_or_get_node(Algebraic::from(&x));
        assert_eq!(first, second);
    }

    #[test]
    fn test_operator_nodes_never_dedup() {
        let mut ctx = Context::new();
        let x = ctx.variable("x");

        // (x + x) + (x + x): both additions stay distinct nodes
        let inner_a = add(&x, &x);
        let inner_b = add(&x, &x);
        let outer = add(inner_a, inner_b);

        let op_nodes = outer
            .nodes
            .iter()
            .filter(|node| matches!(node, Node::Op(Op::Add)))
            .count();
        assert_eq!(op_nodes, 3);
    }

    #[test]
    fn test_merge_renumbers_and_unions_edges() {
        let mut ctx = Context::new();
        let a = ctx.variable("a");
        let b = ctx.variable("b");
        let c = ctx.variable("c");

        let left = add(&a, &b);
        let right = mul(&b, &c);
        let combined = add(left, right);

        // shared leaf `b` is deduplicated across the merge
        let leaf_nodes = combined
            .nodes
            .iter()
            .filter(|node| matches!(node, Node::Leaf(_)))
            .count();
        assert_eq!(leaf_nodes, 3);

        let mut bindings = Bindings::new();
        bindings.bind(a, 1.0).bind(b, 2.0).bind(c, 3.0);
        assert_eq!(combined.eval(&ctx, &bindings).unwrap(), Value::Scalar(9.0));
    }

    #[test]
    fn test_push_op_reassigns_head() {
        let mut ctx = Context::new();
        let x = ctx.variable("x");

        let graph = add(&x, 1.0);
        let old_head = graph.head();
        let graph = graph.push_op(Op::Neg, vec![]);
        assert_ne!(graph.head(), old_head);
        assert_eq!(graph.children(graph.head()), &[old_head]);

        let mut bindings = Bindings::new();
        bindings.bind(x, 2.0);
        assert_eq!(graph.eval(&ctx, &bindings).unwrap(), Value::Scalar(-3.0));
    }

    #[test]
    fn test_fully_bound_call_folds_to_constant() {
        let mut ctx = Context::new();
        let a = ctx.variable("a");
        let b = ctx.variable("b");

        let graph = add(mul(&a, 2.0), &b);
        let mut bindings = Bindings::new();
        bindings.bind(a, 4.0).bind(b, 1.5);

        let folded = graph.call(&ctx, &bindings).unwrap();
        assert_eq!(folded.as_value(), Some(&Value::Scalar(9.5)));
    }

    #[test]
    fn test_partial_evaluation() {
        let mut ctx = Context::new();
        let a = ctx.variable("a");
        let b = ctx.variable("b");

        let graph = add(mul(&a, 2.0), &b);

        let mut first = Bindings::new();
        first.bind(a, 4.0);
        let residual = graph.call(&ctx, &first).unwrap();

        // a was folded away, b is still free
        let residual = match residual {
            Algebraic::Graph(g) => g,
            other => panic!("expected residual graph, got {other:?}"),
        };
        assert_eq!(
            residual.symbols(&ctx),
            HashSet::from([Leaf::Variable(b.clone())])
        );

        let mut second = Bindings::new();
        second.bind(b, 1.5);
        assert_eq!(residual.eval(&ctx, &second).unwrap(), Value::Scalar(9.5));
    }

    #[test]
    fn test_free_symbol_extraction_strips_bound_time() {
        // symbols(1 + var * sig(1) + param) == {var, sig, param}
        let mut ctx = Context::new();
        let var = ctx.variable("var");
        let sig = signal(&mut ctx, 1);

        struct Plant;
        impl crate::symbols::Block for Plant {
            fn parameters(&self) -> &[String] {
                static NAMES: std::sync::OnceLock<Vec<String>> = std::sync::OnceLock::new();
                NAMES.get_or_init(|| vec!["k".to_string()])
            }
        }
        let block = ctx.insert_block(Box::new(Plant));
        let param = ctx.parameter(block, 0).unwrap();

        let graph = add(add(1.0, mul(&var, sig.at(1.0))), &param);
        let expected = HashSet::from([
            Leaf::Variable(var),
            Leaf::Signal(sig),
            Leaf::Parameter(param),
        ]);
        assert_eq!(graph.symbols(&ctx), expected);
    }

    #[test]
    fn test_bare_signal_contributes_time() {
        let mut ctx = Context::new();
        let sig = signal(&mut ctx, 2);

        let graph = mul(2.0, &sig);
        let expected = HashSet::from([
            Leaf::Signal(sig),
            Leaf::Variable(ctx.time().clone()),
        ]);
        assert_eq!(graph.symbols(&ctx), expected);
    }

    #[test]
    fn test_signal_applied_to_time_variable_keeps_it_free_elsewhere() {
        // sig(t) + t: the application strips t from its own subtree only
        let mut ctx = Context::new();
        let sig = signal(&mut ctx, 1);
        let t = ctx.time().clone();

        let applied = sig.at(&t);
        assert_eq!(applied.symbols(&ctx), HashSet::from([Leaf::Signal(sig.clone())]));

        let graph = add(applied, &t);
        let expected = HashSet::from([Leaf::Signal(sig), Leaf::Variable(t)]);
        assert_eq!(graph.symbols(&ctx), expected);
    }

    #[test]
    fn test_temporal_classification() {
        let mut ctx = Context::new();
        let var = ctx.variable("var");
        let sig = signal(&mut ctx, 1);
        let t = ctx.time().clone();

        // sig(t) tracks time, so var + sig(t) is temporal
        assert!(sig.at(&t).is_temporal(&ctx));
        let graph = add(&var, sig.at(&t));
        assert!(graph.is_temporal(&ctx));

        // sig(0): sampled at a literal time, the value is not temporal
        let sampled = sig.at(0.0);
        assert!(!sampled.is_temporal(&ctx));
        assert!(!add(&var, sig.at(1.0)).is_temporal(&ctx));

        // bare variable and bare time
        assert!(!Algebraic::from(&var).is_temporal(&ctx));
        assert!(Algebraic::from(&t).is_temporal(&ctx));
        assert!(Algebraic::from(&sig).is_temporal(&ctx));
    }

    #[test]
    fn test_signal_sampling_with_binding() {
        let mut ctx = Context::new();
        let sig = signal(&mut ctx, 1);

        let graph = mul(2.0, sig.at(3.0));
        let mut bindings = Bindings::new();
        bindings.bind_signal(sig, |t| Value::Scalar(t * 10.0));

        assert_eq!(graph.eval(&ctx, &bindings).unwrap(), Value::Scalar(60.0));
    }

    #[test]
    fn test_shape_propagation() {
        let mut ctx = Context::new();
        let a = arr2(&[[0.0; 4]; 3]);
        let b = arr2(&[[0.0; 2]; 4]);
        let graph = matmul(a, b);
        assert_eq!(graph.shape(&ctx).unwrap(), Shape::Matrix(3, 2));

        let bad = matmul(arr2(&[[0.0; 4]; 3]), arr2(&[[0.0; 2]; 5]));
        assert!(matches!(
            bad.shape(&ctx).unwrap_err(),
            ShapeError::InnerDimension { .. }
        ));

        let v = ctx.vector_variable("v", 3);
        let graph = add(&v, 1.0);
        assert_eq!(graph.shape(&ctx).unwrap(), Shape::Vector(3));
    }

    #[test]
    fn test_structural_hash_and_equality() {
        use std::collections::hash_map::DefaultHasher;

        let mut ctx = Context::new();
        let x = ctx.variable("x");

        let a = add(&x, 1.0);
        let b = a.clone();
        assert_eq!(a, b);

        let mut ha = DefaultHasher::new();
        let mut hb = DefaultHasher::new();
        a.hash(&mut ha);
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());

        let c = add(&x, 2.0);
        assert_ne!(a, c);
    }

    #[test]
    fn test_display_renders_prefix_notation() {
        let mut ctx = Context::new();
        let x = ctx.variable("x");
        let graph = add(&x, 1.0);
        assert_eq!(graph.to_string(), "Add(x, 1)");
    }
}
