//! Mise en forme des extraits de test.

/// Nom de la fonction enveloppe utilisée par `adjust(.., true)`.
pub const WRAPPER: &str = "test_function";

/// Dédente un extrait écrit en ligne dans un test.
///
/// La première ligne vide est ignorée ; l'indentation de la ligne suivante
/// est retirée de toutes les lignes. Avec `run_in_function`, le corps est
/// réindenté de quatre espaces sous `def test_function():` puis appelé.
/// Un texte d'une seule ligne est rendu tel quel.
pub fn adjust(text: &str, run_in_function: bool) -> String {
    let mut lines: Vec<&str> = text.split('\n').collect();
    if lines.len() == 1 {
        return text.to_owned();
    }
    if lines[0].trim().is_empty() {
        lines.remove(0);
    }
    let Some(first) = lines.first() else { return String::new() };
    let indent = first.chars().take_while(|c| c.is_whitespace()).count();

    let body = lines.iter().map(|line| {
        let rest: String = line.chars().skip(indent).collect();
        if run_in_function && !rest.is_empty() { format!("    {rest}") } else { rest }
    });

    if run_in_function {
        std::iter::once(format!("def {WRAPPER}():"))
            .chain(body)
            .chain(std::iter::once(format!("{WRAPPER}()")))
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        body.collect::<Vec<_>>().join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SNIPPET: &str = "
            x = 3
            if x:
                print(x)
            ";

    #[test]
    fn dedents_from_the_first_line() {
        assert_eq!(adjust(SNIPPET, false), "x = 3\nif x:\n    print(x)\n");
    }

    #[test]
    fn wraps_in_a_function() {
        assert_eq!(
            adjust(SNIPPET, true),
            "def test_function():\n    x = 3\n    if x:\n        print(x)\n\ntest_function()"
        );
    }

    #[test]
    fn single_line_is_untouched() {
        assert_eq!(adjust("   print(1)", true), "   print(1)");
    }
}
