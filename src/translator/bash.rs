use anyhow::Result;
use std::io::Write;
use std::path::Path;

use super::Translator;

#[derive(Debug, Default)]
pub struct BashTranslator {
    lines: Vec<String>,
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

impl Translator for BashTranslator {
    fn var_set(&mut self, name: &str, value: &str) {
        self.lines.push(format!("export {}={}", name, quote(value)));
    }

    fn var_unset(&mut self, name: &str) {
        self.lines.push(format!("export -n {}", name));
        self.lines.push(format!("unset {}", name));
    }

    fn remove_file(&mut self, path: &Path) {
        self.lines
            .push(format!("rm -f {}", quote(&path.to_string_lossy())));
    }

    fn translate(&self, out: &mut dyn Write) -> Result<()> {
        for line in &self.lines {
            writeln!(out, "{}", line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(translator: &BashTranslator) -> String {
        let mut out = Vec::new();
        translator.translate(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_script() {
        let mut translator = BashTranslator::default();
        translator.var_set("PATH", "/opt/alfa/bin:/usr/bin");
        translator.var_unset("BETA_HOME");
        translator.remove_file(Path::new("/tmp/zap.sh"));
        assert_eq!(
            render(&translator),
            "export PATH='/opt/alfa/bin:/usr/bin'\n\
             export -n BETA_HOME\n\
             unset BETA_HOME\n\
             rm -f '/tmp/zap.sh'\n"
        );
    }

    #[test]
    fn test_single_quotes_are_escaped() {
        let mut translator = BashTranslator::default();
        translator.var_set("GREETING", "it's");
        assert_eq!(render(&translator), "export GREETING='it'\\''s'\n");
    }
}
