/// Relationship authoring rules, shared by the MCP instructions and the `get_rules` tool.
pub const RULES: &str = "\
1. One edge per pair. A relationship is keyed by (source, target). Declaring the same pair twice, \
in frontmatter or in a diagram, never creates a second edge.\n\
2. Frontmatter wins. When a component's frontmatter and a diagram both declare the same pair, the \
frontmatter label, type and technology are kept and the diagram arrow is ignored. Fix labels in the \
frontmatter, not in the diagram.\n\
3. Arrow direction = dependency. Write `caller -> provider`. `a <- b` is read as `b -> a`. \
Undirected `a -- b` lines are drawings, not relationships.\n\
4. Short names resolve outward. A bare name is looked up in the current container, then the \
current system, then the project root; the first existing element wins. Use `system/container/component` \
to be explicit.\n\
5. Identifiers are normalized. Case is ignored and runs of spaces, `_` and `-` become one `-`, \
so \"Auth Service\", \"auth_service\" and \"auth-service\" are the same element.\n\
6. Tooltips mirror descriptions. A diagram tooltip for an element should say the same thing as the \
element's frontmatter description. A difference is reported as a DescriptionMismatch warning.\n\
7. Every arrow must land. A diagram arrow whose source or target is not an existing element is a \
MissingComponent error. Create the element or fix the name.\n\
8. Clean up after deletes. A frontmatter or relationships.json entry pointing at an element that \
no longer exists is an OrphanedRelationship error. Remove the entry when the element goes.\n\
9. Broken diagrams are skipped, not fatal. A diagram with unbalanced braces or an unterminated string \
contributes nothing and produces one warning. A single bad line is skipped with a warning and the rest \
of the file still counts.\n\
10. Edit, then invalidate. The graph is cached per project until a watched file changes or \
`invalidate_cache` is called. Queries after an edit outside the watched tree need an explicit invalidate.\n\
11. Queries are bounded. List results default to 20 records and never exceed 100; the response says how \
many matched in total. Dependency walks stop after the configured hop limit and visit each element once.\n\
12. Coupling counts every edge. In-degree plus out-degree, across all declaration sources, is compared \
with the threshold. Elements above it are listed, most connected first.";
