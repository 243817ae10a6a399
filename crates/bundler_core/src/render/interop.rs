use crate::render::deconflict::{INTEROP_DEFAULT, INTEROP_NAMESPACE, MERGE_NAMESPACES};

/// Bridges CommonJS values into ES default/namespace shape. Emitted once
/// per chunk, before the first require.
pub fn interop_default_helper() -> String {
    format!(
        "function {} (e) {{ return e && e.__esModule ? e : {{ default: e }}; }}\n",
        INTEROP_DEFAULT
    )
}

pub fn interop_namespace_helper() -> String {
    format!(
        concat!(
            "function {fn} (e) {{\n",
            "  if (e && e.__esModule) return e;\n",
            "  var n = Object.create(null);\n",
            "  if (e) {{\n",
            "    Object.keys(e).forEach(function (k) {{\n",
            "      if (k !== 'default') {{\n",
            "        var d = Object.getOwnPropertyDescriptor(e, k);\n",
            "        Object.defineProperty(n, k, d.get ? d : {{\n",
            "          enumerable: true,\n",
            "          get: function () {{ return e[k]; }}\n",
            "        }});\n",
            "      }}\n",
            "    }});\n",
            "  }}\n",
            "  n.default = e;\n",
            "  return Object.freeze(n);\n",
            "}}\n"
        ),
        fn = INTEROP_NAMESPACE
    )
}

/// Copies the members of re-exported external namespaces onto `exports`,
/// used for `export * from 'external'` outside the es format.
pub fn merge_namespaces_helper() -> String {
    format!(
        concat!(
            "function {fn} (n, m) {{\n",
            "  m.forEach(function (e) {{\n",
            "    e && Object.keys(e).forEach(function (k) {{\n",
            "      if (k !== 'default' && !(k in n)) {{\n",
            "        var d = Object.getOwnPropertyDescriptor(e, k);\n",
            "        Object.defineProperty(n, k, d.get ? d : {{\n",
            "          enumerable: true,\n",
            "          get: function () {{ return e[k]; }}\n",
            "        }});\n",
            "      }}\n",
            "    }});\n",
            "  }});\n",
            "  return Object.freeze(n);\n",
            "}}\n"
        ),
        fn = MERGE_NAMESPACES
    )
}
