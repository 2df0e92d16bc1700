//! # Command Builder
//!
//! Purpose: Describe one store command as its wire arguments plus the routing
//! facts a topology provider needs (which argument is the key, whether the
//! command only reads).
//!
//! ## Design Principles
//! 1. **Binary-Safe**: Arguments are raw bytes; callers convert with `ToArg`.
//! 2. **Routing Metadata Travels With the Command**: Cluster routing reads the
//!    recorded key position instead of knowing every command's grammar.
//! 3. **Builder Style**: `Cmd::new("SET").key(k).arg(v)` reads like the wire form.

/// Types that can be sent as a command argument.
pub trait ToArg {
    /// Serializes the value into its wire representation.
    fn to_arg(&self) -> Vec<u8>;
}

impl ToArg for str {
    fn to_arg(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl ToArg for String {
    fn to_arg(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl ToArg for [u8] {
    fn to_arg(&self) -> Vec<u8> {
        self.to_vec()
    }
}

impl ToArg for Vec<u8> {
    fn to_arg(&self) -> Vec<u8> {
        self.clone()
    }
}

impl<const N: usize> ToArg for [u8; N] {
    fn to_arg(&self) -> Vec<u8> {
        self.to_vec()
    }
}

impl ToArg for f64 {
    fn to_arg(&self) -> Vec<u8> {
        if self.is_infinite() {
            return if *self > 0.0 { b"+inf".to_vec() } else { b"-inf".to_vec() };
        }
        self.to_string().into_bytes()
    }
}

macro_rules! int_to_arg {
    ($($ty:ty),*) => {
        $(
            impl ToArg for $ty {
                fn to_arg(&self) -> Vec<u8> {
                    self.to_string().into_bytes()
                }
            }
        )*
    };
}

int_to_arg!(i32, i64, u32, u64, usize);

impl<T: ToArg + ?Sized> ToArg for &T {
    fn to_arg(&self) -> Vec<u8> {
        (**self).to_arg()
    }
}

/// A single store command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    args: Vec<Vec<u8>>,
    /// Index into `args` of the first key, used for cluster routing.
    key_index: Option<usize>,
    readonly: bool,
}

impl Cmd {
    /// Starts a command with its name, e.g. `Cmd::new("GET")`.
    pub fn new(name: &str) -> Self {
        Cmd {
            args: vec![name.as_bytes().to_vec()],
            key_index: None,
            readonly: false,
        }
    }

    /// Appends a plain argument.
    pub fn arg<A: ToArg + ?Sized>(mut self, arg: &A) -> Self {
        self.args.push(arg.to_arg());
        self
    }

    /// Appends every element as an argument.
    pub fn args<A: ToArg>(mut self, args: &[A]) -> Self {
        self.args.extend(args.iter().map(ToArg::to_arg));
        self
    }

    /// Appends a key argument. The first key decides cluster routing.
    pub fn key(mut self, key: impl AsRef<[u8]>) -> Self {
        if self.key_index.is_none() {
            self.key_index = Some(self.args.len());
        }
        self.args.push(key.as_ref().to_vec());
        self
    }

    /// Appends several key arguments.
    pub fn keys<K: AsRef<[u8]>>(mut self, keys: impl IntoIterator<Item = K>) -> Self {
        for key in keys {
            self = self.key(key);
        }
        self
    }

    /// Marks the command as side-effect free (eligible for replica reads).
    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// Command name as sent on the wire.
    pub fn name(&self) -> &[u8] {
        &self.args[0]
    }

    /// All wire arguments, name first.
    pub fn as_args(&self) -> &[Vec<u8>] {
        &self.args
    }

    /// The key used for routing, if any.
    pub fn routing_key(&self) -> Option<&[u8]> {
        self.key_index.map(|idx| self.args[idx].as_slice())
    }

    /// True when the command only reads.
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Case-insensitive name comparison.
    pub fn is(&self, name: &str) -> bool {
        self.name().eq_ignore_ascii_case(name.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_first_key_for_routing() {
        let cmd = Cmd::new("MSET").key("a").arg("1").key("b").arg("2");
        assert_eq!(cmd.routing_key(), Some(&b"a"[..]));
        assert_eq!(cmd.as_args().len(), 5);
    }

    #[test]
    fn keyless_command_has_no_route() {
        let cmd = Cmd::new("PING");
        assert!(cmd.routing_key().is_none());
        assert!(cmd.is("ping"));
    }

    #[test]
    fn floats_encode_infinity_like_the_store() {
        assert_eq!(f64::INFINITY.to_arg(), b"+inf".to_vec());
        assert_eq!(f64::NEG_INFINITY.to_arg(), b"-inf".to_vec());
        assert_eq!(1.5f64.to_arg(), b"1.5".to_vec());
    }
}
