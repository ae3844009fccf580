//! shell 引用工具 - 拼接交给 `sh -c` 或 tmux 命令解析器的命令行

/// 对单个参数做 POSIX shell 引用，安全字符组成的参数原样返回
pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".into();
    }
    let safe = s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

/// 把 argv 拼成一条 shell 命令
pub fn shell_join<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|a| shell_quote(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_empty() {
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_quote_plain_word_untouched() {
        assert_eq!(shell_quote("pod/web-1"), "pod/web-1");
        assert_eq!(shell_quote("%3"), "%3");
    }

    #[test]
    fn test_quote_spaces_and_single_quotes() {
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn test_join() {
        let cmd = shell_join(&["kubectl", "logs", "web", "--since", "5 m"]);
        assert_eq!(cmd, "kubectl logs web --since '5 m'");
    }
}
