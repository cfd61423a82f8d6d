use once_cell::sync::Lazy;
use regex::Regex;

/// Shell metacharacters that never appear in a read-only invocation.
const SHELL_METACHARACTERS: &[char] =
    &[';', '&', '|', '`', '$', '<', '>', '{', '}', '\\', '\n', '\r'];

/// Closed set of read-only command shapes allowed over ssh. Anything not
/// matching one of these is blocked before dispatch.
static READONLY_COMMAND_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^uptime$",
        r"^whoami$",
        r"^id$",
        r"^hostname$",
        r"^date$",
        r"^uname(?: -[amrsv])?$",
        r"^free(?: -[bhkmg])?$",
        r"^df(?: -[hHT])?$",
        r"^ping -c (?:[1-9]|10) [A-Za-z0-9_.:-]+$",
        r"^ls(?: -[a-zA-Z]+)? /[A-Za-z0-9_./-]*$",
        r"^docker ps$",
        r"^docker stats --no-stream$",
        r"^systemctl status [A-Za-z0-9_.@-]+$",
        r"^journalctl -u [A-Za-z0-9_.@-]+(?: -n [0-9]{1,4})?$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("readonly command pattern"))
    .collect()
});

/// Returns `Some(denial_message)` unless the command is a known read-only
/// shape with no shell metacharacters.
pub fn ssh_policy_violation(command: &str) -> Option<String> {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return Some("empty ssh command".to_string());
    }
    if let Some(bad) = trimmed.chars().find(|c| SHELL_METACHARACTERS.contains(c)) {
        return Some(format!(
            "ssh command contains shell metacharacter `{}`",
            bad.escape_default()
        ));
    }
    if READONLY_COMMAND_RES.iter().any(|re| re.is_match(trimmed)) {
        None
    } else {
        Some("ssh command is not in the read-only allowlist".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_readonly_commands_pass() {
        for cmd in [
            "uptime",
            "whoami",
            "id",
            "hostname",
            "date",
            "uname -a",
            "free -h",
            "df -h",
            "ping -c 3 10.0.0.12",
            "ls /var/log",
            "ls -la /etc",
            "docker ps",
            "docker stats --no-stream",
            "systemctl status nginx",
            "journalctl -u sshd -n 50",
        ] {
            assert!(ssh_policy_violation(cmd).is_none(), "expected pass: {cmd}");
        }
    }

    #[test]
    fn mutating_commands_are_blocked() {
        for cmd in [
            "rm -rf /",
            "reboot",
            "systemctl restart nginx",
            "docker rm web",
            "cat /etc/shadow",
            "ls relative/path",
        ] {
            assert!(ssh_policy_violation(cmd).is_some(), "expected block: {cmd}");
        }
    }

    #[test]
    fn metacharacters_are_blocked_even_on_allowed_shapes() {
        for cmd in [
            "uptime; rm -rf /",
            "uptime | tee /tmp/x",
            "uptime `id`",
            "uptime $(id)",
            "uptime > /tmp/out",
            "ls /tmp && whoami",
        ] {
            let violation = ssh_policy_violation(cmd).expect("blocked");
            assert!(
                violation.contains("metacharacter") || violation.contains("allowlist"),
                "unexpected message for {cmd}: {violation}"
            );
        }
    }

    #[test]
    fn ping_count_is_bounded() {
        assert!(ssh_policy_violation("ping -c 10 example.org").is_none());
        assert!(ssh_policy_violation("ping -c 500 example.org").is_some());
        assert!(ssh_policy_violation("ping example.org").is_some());
    }
}
