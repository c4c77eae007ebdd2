use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

lazy_static! {
    /// The global scope repo, exposed in case you want to minimize locking and unlocking.
    /// Shouldn't be necessary for you to use. See the `ScopeRepository` docs.
    pub static ref SCOPE_REPO: Mutex<ScopeRepository> = Mutex::new(ScopeRepository::new());
}

/// A hierarchy of atoms with semi-standardized names
/// used to accord semantic information to a specific piece of text.
/// Generally written with the atoms separated by dots.
/// By convention atoms are all lowercase alphanumeric.
///
/// Example scopes: `text.plain`, `punctuation.definition.string.begin.ruby`,
/// `keyword.control.import.python`
///
/// `synterm` interns atom strings in a global repository and stores a scope as
/// the sequence of its atom numbers. Comparing atoms is an integer compare and
/// selector scoring walks the atom sequences directly; extracting a string is
/// relatively slower but only happens for display and show-scopes output.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Scope {
    atoms: Vec<u16>,
}

/// Not all strings can become scopes
#[derive(Debug, thiserror::Error)]
pub enum ParseScopeError {
    /// The internal representation uses 16 bits per atom, so if all scopes ever
    /// used by the program have more than 2^16-1 distinct atoms, things break
    #[error("Too many atoms. At most 2^16-1 distinct scope atoms are supported.")]
    TooManyAtoms,
}

/// The structure used to keep the mapping between scope atom numbers
/// and their string names. It is only exposed in case you want to lock
/// `SCOPE_REPO` and then allocate a whole bunch of scopes at once
/// without thrashing the lock. It is recommended you just use `Scope::new()`
///
/// Only `Scope`s created by the same repository have valid comparison results.
#[derive(Debug)]
pub struct ScopeRepository {
    atoms: Vec<String>,
    atom_index_map: HashMap<String, u16>,
}

impl ScopeRepository {
    fn new() -> ScopeRepository {
        ScopeRepository {
            atoms: Vec::new(),
            atom_index_map: HashMap::new(),
        }
    }

    pub fn build(&mut self, s: &str) -> Result<Scope, ParseScopeError> {
        let atoms = s
            .split('.')
            .map(|a| self.atom_to_index(a))
            .collect::<Result<Vec<u16>, ParseScopeError>>()?;
        Ok(Scope { atoms })
    }

    pub fn to_string(&self, scope: &Scope) -> String {
        let mut s = String::new();
        for (i, &atom_number) in scope.atoms.iter().enumerate() {
            if i != 0 {
                s.push('.');
            }
            s.push_str(self.atom_str(atom_number));
        }
        s
    }

    fn atom_to_index(&mut self, atom: &str) -> Result<u16, ParseScopeError> {
        if let Some(index) = self.atom_index_map.get(atom) {
            return Ok(*index);
        }
        if self.atoms.len() >= usize::from(u16::MAX) {
            return Err(ParseScopeError::TooManyAtoms);
        }

        self.atoms.push(atom.to_owned());
        let index = (self.atoms.len() - 1) as u16;
        self.atom_index_map.insert(atom.to_owned(), index);

        Ok(index)
    }

    /// Return the string for an atom number stored in a `Scope`
    pub fn atom_str(&self, atom_number: u16) -> &str {
        &self.atoms[atom_number as usize]
    }
}

impl Scope {
    /// Parses a `Scope` from a series of atoms separated by `.` characters.
    /// Example: `Scope::new("keyword.control.import")`
    pub fn new(s: &str) -> Result<Scope, ParseScopeError> {
        let mut repo = SCOPE_REPO.lock().unwrap();
        repo.build(s.trim())
    }

    /// The interned atom numbers making up this scope, in order.
    #[inline]
    pub fn atoms(&self) -> &[u16] {
        &self.atoms
    }

    /// The number of dot-separated atoms in the scope
    #[inline]
    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// Returns a string representation of this scope. This requires locking a
    /// global repo and shouldn't be done frequently.
    pub fn build_string(&self) -> String {
        let repo = SCOPE_REPO.lock().unwrap();
        repo.to_string(self)
    }
}

impl FromStr for Scope {
    type Err = ParseScopeError;

    fn from_str(s: &str) -> Result<Scope, ParseScopeError> {
        Scope::new(s)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.build_string())
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<{}>", self.build_string())
    }
}

/// The stack of active scopes at the cursor, together with a ledger of how
/// many scopes were pushed in each logical group.
///
/// One call to the writer's `push_scope` can push several space-separated
/// scopes at once; the matching `pop_scope` has to unwind exactly that many.
/// The group ledger keeps the two sides in sync.
#[derive(Debug, Clone, Default)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
    group_sizes: Vec<usize>,
}

impl ScopeStack {
    pub fn new() -> ScopeStack {
        ScopeStack::default()
    }

    /// Record that the next `size` pushes belong to one group.
    pub fn open_group(&mut self, size: usize) {
        self.group_sizes.push(size);
    }

    pub fn push(&mut self, scope: Scope) {
        self.scopes.push(scope);
    }

    /// Close the most recent group, returning how many scopes it holds.
    pub fn close_group(&mut self) -> usize {
        self.group_sizes.pop().unwrap_or(0)
    }

    pub fn pop(&mut self) -> Option<Scope> {
        self.scopes.pop()
    }

    /// Return a slice of the scopes in this stack, bottom first
    #[inline]
    pub fn as_slice(&self) -> &[Scope] {
        &self.scopes[..]
    }

    /// Return the height/length of this stack
    #[inline]
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total size of all open groups. Equals `len()` whenever the stack is
    /// balanced, i.e. between writer operations.
    pub fn grouped_len(&self) -> usize {
        self.group_sizes.iter().sum()
    }
}

impl fmt::Display for ScopeStack {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for s in self.scopes.iter() {
            write!(f, "{} ", s)?;
        }
        Ok(())
    }
}
