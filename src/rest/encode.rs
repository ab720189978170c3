use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

// reserved + unsafe characters, matching the strict encoding object stores
// expect inside signed paths
const FRAGMENT: &AsciiSet = &CONTROLS
    .add(b':')
    .add(b'?')
    .add(b'#')
    .add(b'[')
    .add(b']')
    .add(b'@')
    .add(b'!')
    .add(b'$')
    .add(b'&')
    .add(b'\'')
    .add(b'(')
    .add(b')')
    .add(b'*')
    .add(b'+')
    .add(b',')
    .add(b';')
    .add(b'=')
    .add(b'"')
    .add(b' ')
    .add(b'<')
    .add(b'>')
    .add(b'%')
    .add(b'{')
    .add(b'}')
    .add(b'|')
    .add(b'\\')
    .add(b'^')
    .add(b'`');

const FRAGMENT_SLASH: &AsciiSet = &FRAGMENT.add(b'/');

/// URL-encodes a path: segments are encoded once, slashes preserved.
pub fn encode_path(string: &str) -> String {
    utf8_percent_encode(string, FRAGMENT).to_string()
}

/// URL-encodes a query parameter value, including slashes.
pub fn encode_query(string: &str) -> String {
    utf8_percent_encode(string, FRAGMENT_SLASH).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn path_keeps_slashes() {
        assert_eq!(encode_path("dump/sales q1.tsv"), "dump/sales%20q1.tsv");
        assert_eq!(encode_path("a (x)%="), "a%20%28x%29%25%3D");
    }

    #[test]
    fn query_encodes_slashes() {
        assert_eq!(encode_query("p/q"), "p%2Fq");
        assert_eq!(encode_query("token=="), "token%3D%3D");
    }
}
