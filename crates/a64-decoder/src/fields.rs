/// Field values extracted from one instruction word.
///
/// Lookups are by the names declared in the matching [`crate::Pattern`]; asking for a name the
/// pattern does not declare is a bug in the caller and panics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fields {
    word: u32,
    values: Vec<(&'static str, u32)>,
}

impl Fields {
    pub(crate) fn new(word: u32, values: Vec<(&'static str, u32)>) -> Self {
        Self { word, values }
    }

    /// The raw instruction word the fields were extracted from.
    #[inline]
    pub fn word(&self) -> u32 {
        self.word
    }

    pub fn try_get(&self, name: &str) -> Option<u32> {
        self.values
            .iter()
            .find_map(|&(n, v)| (n == name).then_some(v))
    }

    pub fn get(&self, name: &str) -> u32 {
        match self.try_get(name) {
            Some(v) => v,
            None => panic!(
                "field `{name}` is not declared by the pattern for {:#010x}",
                self.word
            ),
        }
    }

    /// Fetch several fields at once, e.g. `let [rn, rd] = fields.take(["Rn", "Rd"]);`.
    pub fn take<const N: usize>(&self, names: [&str; N]) -> [u32; N] {
        names.map(|name| self.get(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u32)> + '_ {
        self.values.iter().copied()
    }
}
